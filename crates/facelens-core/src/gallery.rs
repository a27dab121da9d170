//! Filesystem-backed identity gallery.
//!
//! Layout: one directory per identity key under the gallery root, holding
//! `face_<n>.jpg` reference images, plus an optional embedding index file
//! at the root that is deleted on every mutation.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Derived embedding index, rebuilt on demand after invalidation.
pub const INDEX_FILE_NAME: &str = "representations_arcface.json";

const REFERENCE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("gallery io: {0}")]
    Io(#[from] io::Error),
}

/// An enrolled person and their reference images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub references: Vec<PathBuf>,
}

/// One reference image together with the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub identity: String,
    pub path: PathBuf,
}

/// Handle to a gallery directory. Cheap to clone; holds no cached state.
#[derive(Debug, Clone)]
pub struct Gallery {
    root: PathBuf,
}

impl Gallery {
    /// Open the gallery at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    /// Store a new reference image for `name`, creating the identity on
    /// first use. Returns false on any failure; the error is logged.
    pub fn add_identity(&self, name: &str, image_bytes: &[u8]) -> bool {
        match self.try_add_identity(name, image_bytes) {
            Ok(path) => {
                tracing::info!(name, path = %path.display(), "reference image stored");
                true
            }
            Err(e) => {
                tracing::error!(name, error = %e, "failed to store reference image");
                false
            }
        }
    }

    /// Like [`add_identity`](Self::add_identity) but returns the stored path.
    ///
    /// Existing references are never overwritten: the next free
    /// `face_<n>.jpg` is claimed with `create_new`, so concurrent adds for
    /// the same identity get distinct files.
    pub fn try_add_identity(&self, name: &str, image_bytes: &[u8]) -> Result<PathBuf, GalleryError> {
        let key = normalize_name(name).ok_or_else(|| GalleryError::InvalidName(name.to_string()))?;
        let dir = self.root.join(&key);
        fs::create_dir_all(&dir)?;

        let mut n = fs::read_dir(&dir)?.count() + 1;
        let (path, mut file) = loop {
            let path = dir.join(format!("face_{n}.jpg"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        };

        if let Err(e) = file.write_all(image_bytes).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        self.invalidate_index()?;
        Ok(path)
    }

    /// Delete the derived index so the next recognition rebuilds it.
    pub fn invalidate_index(&self) -> Result<(), GalleryError> {
        match fs::remove_file(self.index_path()) {
            Ok(()) => {
                tracing::debug!("gallery index invalidated");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True iff at least one identity directory holds at least one entry.
    pub fn is_populated(&self) -> bool {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return false;
        };
        entries.flatten().any(|entry| {
            entry.path().is_dir()
                && fs::read_dir(entry.path())
                    .map(|mut inner| inner.next().is_some())
                    .unwrap_or(false)
        })
    }

    /// All identities with at least one reference image, sorted by name.
    pub fn identities(&self) -> Result<Vec<Identity>, GalleryError> {
        let mut identities = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let mut references: Vec<PathBuf> = fs::read_dir(entry.path())?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_reference_image(p))
                .collect();
            if references.is_empty() {
                continue;
            }
            references.sort();
            identities.push(Identity {
                name: entry.file_name().to_string_lossy().into_owned(),
                references,
            });
        }
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(identities)
    }

    /// Every reference image in the gallery, grouped by identity.
    pub fn references(&self) -> Result<Vec<Reference>, GalleryError> {
        Ok(self
            .identities()?
            .into_iter()
            .flat_map(|identity| {
                let name = identity.name;
                identity.references.into_iter().map(move |path| Reference {
                    identity: name.clone(),
                    path,
                })
            })
            .collect())
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| REFERENCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Folder-safe identity key: lowercase, whitespace to `_`, anything other
/// than alphanumerics, `_` and `-` dropped. `None` if nothing usable remains.
pub fn normalize_name(name: &str) -> Option<String> {
    let key: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    key.chars().any(char::is_alphanumeric).then_some(key)
}

/// Human form of an identity key: `jane_doe` -> `Jane Doe`.
pub fn display_name(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
