//! Face recognition: ArcFace embeddings via ONNX Runtime, and the
//! best-effort adapter the pipeline calls to name faces against the gallery.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::gallery::Gallery;
use crate::index::IndexError;
use crate::types::{Detection, Embedding, IdentityHit};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// ArcFace uses symmetric normalisation, unlike SCRFD.
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face detection failed: {0}")]
    Detection(#[from] crate::detector::DetectorError),
    #[error("gallery index: {0}")]
    Index(#[from] IndexError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns one detected face into an embedding.
pub trait Embed: Send {
    fn model_version(&self) -> &str;

    fn embed(&mut self, image: &RgbImage, face: &Detection) -> Result<Embedding, RecognizerError>;
}

/// Nearest-neighbour search of an image's faces against the gallery.
pub trait FaceMatcher: Send {
    /// One hit per face the matcher finds on its own, best-first by distance.
    fn find(&mut self, image: &RgbImage, gallery: &Gallery) -> Result<Vec<IdentityHit>, RecognizerError>;
}

/// ArcFace-based face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess a 112x112 aligned RGB face into a NCHW float tensor.
    fn preprocess(aligned_face: &RgbImage) -> Array4<f32> {
        let size = ALIGNED_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in aligned_face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl Embed for FaceEmbedder {
    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }

    /// Align the face to the canonical 112x112 position and extract an
    /// L2-normalised embedding. Faces without landmarks are aligned from
    /// their box alone.
    fn embed(&mut self, image: &RgbImage, face: &Detection) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.unwrap_or_else(|| {
            alignment::template_landmarks(face.x, face.y, face.width, face.height)
        });
        let aligned = alignment::align_face(image, &landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        let norm: f32 = raw_data.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw_data.iter().map(|x| x / norm).collect()
        } else {
            raw_data.to_vec()
        };

        Ok(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// Wraps a [`FaceMatcher`] so recognition can never fail a request.
pub struct RecognizerAdapter {
    matcher: Box<dyn FaceMatcher>,
}

impl RecognizerAdapter {
    pub fn new(matcher: Box<dyn FaceMatcher>) -> Self {
        Self { matcher }
    }

    /// Identity hits for the faces in `image`, best-first.
    ///
    /// An unpopulated gallery short-circuits without touching the matcher;
    /// matcher errors are logged and yield no hits.
    pub fn recognize(&mut self, image: &RgbImage, gallery: &Gallery) -> Vec<IdentityHit> {
        if !gallery.is_populated() {
            tracing::debug!("gallery is empty; skipping recognition");
            return Vec::new();
        }

        match self.matcher.find(image, gallery) {
            Ok(hits) => {
                tracing::debug!(count = hits.len(), "recognition complete");
                hits
            }
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed; faces will be labelled unknown");
                Vec::new()
            }
        }
    }
}
