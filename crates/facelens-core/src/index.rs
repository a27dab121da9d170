//! Cached embeddings of every gallery reference image.
//!
//! The index lives next to the identity directories as a single JSON file.
//! It is keyed by a fingerprint of the reference set, so an index that
//! survived a mutation it did not see is rebuilt rather than trusted.

use crate::gallery::{Gallery, GalleryError, Reference};
use crate::types::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index io: {0}")]
    Io(#[from] io::Error),
    #[error("index is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("index persist: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub identity: String,
    /// Path relative to the gallery root.
    pub path: PathBuf,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryIndex {
    pub model: String,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

impl GalleryIndex {
    /// Read the stored index, `None` if there is none.
    pub fn load(gallery: &Gallery) -> Result<Option<Self>, IndexError> {
        match fs::read(gallery.index_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stored index atomically (write a sibling temp file, rename).
    pub fn store(&self, gallery: &Gallery) -> Result<(), IndexError> {
        let mut tmp = tempfile::NamedTempFile::new_in(gallery.root())?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(gallery.index_path())?;
        Ok(())
    }

    /// Return the stored index if it matches the current references and
    /// `model`; otherwise rebuild it with `embed` and store the result.
    ///
    /// References `embed` cannot handle (`None`) are left out of the index.
    pub fn load_or_build<F>(gallery: &Gallery, model: &str, mut embed: F) -> Result<Self, IndexError>
    where
        F: FnMut(&Reference) -> Option<Embedding>,
    {
        let references = gallery.references()?;
        let fingerprint = fingerprint(gallery, &references);

        match Self::load(gallery) {
            Ok(Some(index)) if index.model == model && index.fingerprint == fingerprint => {
                return Ok(index);
            }
            Ok(Some(_)) => tracing::info!("gallery index is stale; rebuilding"),
            Ok(None) => tracing::info!("no gallery index; building"),
            Err(e) => tracing::warn!(error = %e, "unreadable gallery index; rebuilding"),
        }

        let entries: Vec<IndexEntry> = references
            .iter()
            .filter_map(|reference| {
                let embedding = embed(reference)?;
                Some(IndexEntry {
                    identity: reference.identity.clone(),
                    path: relative_path(gallery, reference),
                    embedding,
                })
            })
            .collect();

        let index = Self {
            model: model.to_string(),
            fingerprint,
            built_at: Utc::now(),
            entries,
        };
        index.store(gallery)?;

        tracing::info!(
            references = references.len(),
            embedded = index.entries.len(),
            "gallery index built"
        );
        Ok(index)
    }
}

fn relative_path(gallery: &Gallery, reference: &Reference) -> PathBuf {
    reference
        .path
        .strip_prefix(gallery.root())
        .map(PathBuf::from)
        .unwrap_or_else(|_| reference.path.clone())
}

/// SHA-256 over every reference's relative path and size.
fn fingerprint(gallery: &Gallery, references: &[Reference]) -> String {
    let mut hasher = Sha256::new();
    for reference in references {
        let len = fs::metadata(&reference.path).map(|m| m.len()).unwrap_or(0);
        hasher.update(relative_path(gallery, reference).to_string_lossy().as_bytes());
        hasher.update(len.to_le_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(v: f32) -> Embedding {
        Embedding { values: vec![v, 1.0], model_version: None }
    }

    #[test]
    fn test_load_missing_index_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(GalleryIndex::load(&gallery).unwrap().is_none());
    }

    #[test]
    fn test_build_then_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Ann", b"a"));
        assert!(gallery.add_identity("Ben", b"b"));

        let mut calls = 0;
        let index = GalleryIndex::load_or_build(&gallery, "m", |_| {
            calls += 1;
            Some(embedding(calls as f32))
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].identity, "ann");
        assert_eq!(index.entries[0].path, PathBuf::from("ann").join("face_1.jpg"));
        assert!(gallery.index_path().exists());

        let again = GalleryIndex::load_or_build(&gallery, "m", |_| panic!("should reuse")).unwrap();
        assert_eq!(again.fingerprint, index.fingerprint);
    }

    #[test]
    fn test_add_forces_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Ann", b"a"));
        GalleryIndex::load_or_build(&gallery, "m", |_| Some(embedding(0.0))).unwrap();

        assert!(gallery.add_identity("Ann", b"a2"));
        let mut calls = 0;
        let index = GalleryIndex::load_or_build(&gallery, "m", |_| {
            calls += 1;
            Some(embedding(0.0))
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(index.entries.len(), 2);
    }

    #[test]
    fn test_stale_index_left_behind_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Ann", b"a"));
        let old = GalleryIndex::load_or_build(&gallery, "m", |_| Some(embedding(0.0))).unwrap();

        // A reference appears without going through add_identity.
        fs::write(gallery.root().join("ann").join("face_9.jpg"), b"x").unwrap();
        let new = GalleryIndex::load_or_build(&gallery, "m", |_| Some(embedding(0.0))).unwrap();
        assert_ne!(old.fingerprint, new.fingerprint);
        assert_eq!(new.entries.len(), 2);
    }

    #[test]
    fn test_model_change_forces_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Ann", b"a"));
        GalleryIndex::load_or_build(&gallery, "old-model", |_| Some(embedding(0.0))).unwrap();

        let index = GalleryIndex::load_or_build(&gallery, "new-model", |_| Some(embedding(1.0))).unwrap();
        assert_eq!(index.model, "new-model");
    }

    #[test]
    fn test_unembeddable_references_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Ann", b"a"));
        assert!(gallery.add_identity("Ben", b"b"));

        let index = GalleryIndex::load_or_build(&gallery, "m", |r| {
            (r.identity == "ben").then(|| embedding(0.0))
        })
        .unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].identity, "ben");
    }

    #[test]
    fn test_corrupt_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Ann", b"a"));
        fs::write(gallery.index_path(), b"not json").unwrap();
        assert!(matches!(GalleryIndex::load(&gallery), Err(IndexError::Malformed(_))));

        let index = GalleryIndex::load_or_build(&gallery, "m", |_| Some(embedding(0.0))).unwrap();
        assert_eq!(index.entries.len(), 1);
    }
}
