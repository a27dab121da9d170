//! The detect → recognize → correlate → render pipeline for one image.

use crate::batch;
use crate::correlator::correlate;
use crate::detector::{DetectorAdapter, DetectorError};
use crate::gallery::Gallery;
use crate::imageio::{self, ImageInputError};
use crate::models::{ModelError, ModelManifest};
use crate::recognizer::RecognizerAdapter;
use crate::render::Annotator;
use crate::types::{BatchRecord, FaceRecord};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] ImageInputError),
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("cannot encode annotated image: {0}")]
    Encode(#[from] image::ImageError),
}

impl PipelineError {
    /// True when the caller sent something unusable, as opposed to the
    /// service failing to process a valid image.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }
}

/// Result of analyzing one image.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub faces: Vec<FaceRecord>,
    /// Annotated JPEG, or the untouched input when no face was found.
    pub processed_image: Vec<u8>,
}

/// Everything one worker needs to serve requests. Not shared between threads.
pub struct FacePipeline {
    detector: DetectorAdapter,
    recognizer: RecognizerAdapter,
    gallery: Gallery,
    annotator: Arc<Annotator>,
}

impl FacePipeline {
    pub fn new(
        detector: DetectorAdapter,
        recognizer: RecognizerAdapter,
        gallery: Gallery,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            detector,
            recognizer,
            gallery,
            annotator,
        }
    }

    /// Build fresh ONNX sessions from a verified manifest.
    pub fn from_manifest(
        manifest: &ModelManifest,
        gallery: Gallery,
        annotator: Arc<Annotator>,
    ) -> Result<Self, ModelError> {
        let detector = manifest.load_detector_chain()?;
        let recognizer = RecognizerAdapter::new(Box::new(manifest.load_matcher()?));
        Ok(Self::new(detector, recognizer, gallery, annotator))
    }

    /// Detect, name and annotate every face in an encoded image.
    ///
    /// Detection failure aborts; recognition failure only leaves faces
    /// unknown.
    pub fn analyze(&mut self, image_bytes: &[u8]) -> Result<Analysis, PipelineError> {
        let image = imageio::decode_rgb(image_bytes)?;

        let boxes = self.detector.detect(&image)?;
        tracing::info!(faces = boxes.len(), "detection complete");
        if boxes.is_empty() {
            return Ok(Analysis {
                faces: Vec::new(),
                processed_image: image_bytes.to_vec(),
            });
        }

        let hits = self.recognizer.recognize(&image, &self.gallery);
        let faces = correlate(&boxes, &hits);
        tracing::info!(
            faces = faces.len(),
            hits = hits.len(),
            known = faces.iter().filter(|f| !f.is_unknown()).count(),
            "correlation complete"
        );

        let mut annotated = image;
        self.annotator.annotate(&mut annotated, &faces);
        let processed_image = imageio::encode_jpeg(&annotated)?;

        Ok(Analysis { faces, processed_image })
    }

    /// Name pre-cropped faces; see [`batch::recognize_batch`].
    pub fn recognize_batch(&mut self, faces_b64: &[String]) -> Vec<BatchRecord> {
        batch::recognize_batch(&mut self.recognizer, &self.gallery, faces_b64)
    }
}
