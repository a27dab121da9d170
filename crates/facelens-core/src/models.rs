//! Model files: startup verification and session construction.
//!
//! A verified [`ModelManifest`] is the immutable handle every worker builds
//! its own ONNX sessions from. Nothing here downloads or moves model files.

use crate::detector::{DetectBackend, DetectorAdapter, DetectorError, FaceDetector};
use crate::matcher::EmbeddingMatcher;
use crate::recognizer::{FaceEmbedder, RecognizerError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const FALLBACK_DETECTOR_MODEL: &str = "det_500m.onnx";
pub const EMBEDDER_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file {file} is missing from {dir}; place the insightface ONNX models there")]
    Missing { file: String, dir: String },
    #[error("model file {0} is empty or truncated; delete it and download it again")]
    Empty(String),
    #[error("model io: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Default model directory: `models/` under the working directory.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Model files found on disk and checked for plausibility.
#[derive(Debug, Clone)]
pub struct ModelManifest {
    /// Detector backends in fallback order, as (name, path).
    pub detectors: Vec<(String, PathBuf)>,
    pub embedder: PathBuf,
}

impl ModelManifest {
    /// Check that the required models exist and are non-empty. The fallback
    /// detector is optional and left out with a warning when absent.
    pub fn verify(dir: &Path) -> Result<Self, ModelError> {
        let primary = require(dir, DETECTOR_MODEL)?;
        let embedder = require(dir, EMBEDDER_MODEL)?;

        let mut detectors = vec![("scrfd-10g".to_string(), primary)];
        match require(dir, FALLBACK_DETECTOR_MODEL) {
            Ok(path) => detectors.push(("scrfd-500m".to_string(), path)),
            Err(e) => tracing::warn!(error = %e, "fallback detector unavailable; running without fallback"),
        }

        tracing::info!(dir = %dir.display(), detectors = detectors.len(), "model files verified");
        Ok(Self { detectors, embedder })
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.detectors.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Load every detector session, in fallback order.
    pub fn load_detector_chain(&self) -> Result<DetectorAdapter, ModelError> {
        let mut backends: Vec<Box<dyn DetectBackend>> = Vec::with_capacity(self.detectors.len());
        for (name, path) in &self.detectors {
            backends.push(Box::new(FaceDetector::load(name, path)?));
        }
        Ok(DetectorAdapter::new(backends))
    }

    /// The recognizer re-detects with its own primary-detector session.
    pub fn load_matcher(&self) -> Result<EmbeddingMatcher, ModelError> {
        let (name, path) = self
            .detectors
            .first()
            .ok_or(ModelError::Detector(DetectorError::NoBackends))?;
        let detector = FaceDetector::load(name, path)?;
        let embedder = FaceEmbedder::load(&self.embedder)?;
        Ok(EmbeddingMatcher::new(Box::new(detector), Box::new(embedder)))
    }
}

fn require(dir: &Path, file: &str) -> Result<PathBuf, ModelError> {
    let path = dir.join(file);
    match fs::metadata(&path) {
        Ok(meta) if meta.len() == 0 => Err(ModelError::Empty(path.display().to_string())),
        Ok(_) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ModelError::Missing {
            file: file.to_string(),
            dir: dir.display().to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}
