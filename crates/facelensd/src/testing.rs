//! Model-free stand-ins for building engine pipelines in tests.

use facelens_core::detector::DetectorError;
use facelens_core::recognizer::RecognizerError;
use facelens_core::{
    Annotator, DetectBackend, DetectorAdapter, Detection, FaceMatcher, FacePipeline, Gallery,
    IdentityHit, RecognizerAdapter,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

pub struct FixedDetector {
    detections: Vec<Detection>,
    delay: Duration,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl DetectBackend for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        std::thread::sleep(self.delay);
        Ok(self.detections.clone())
    }
}

pub struct FixedMatcher {
    hits: Vec<IdentityHit>,
}

impl FixedMatcher {
    pub fn new(hits: Vec<IdentityHit>) -> Self {
        Self { hits }
    }
}

impl FaceMatcher for FixedMatcher {
    fn find(&mut self, _image: &RgbImage, _gallery: &Gallery) -> Result<Vec<IdentityHit>, RecognizerError> {
        Ok(self.hits.clone())
    }
}

pub fn test_pipeline(detector: FixedDetector, matcher: FixedMatcher, gallery: &Gallery) -> FacePipeline {
    FacePipeline::new(
        DetectorAdapter::new(vec![Box::new(detector)]),
        RecognizerAdapter::new(Box::new(matcher)),
        gallery.clone(),
        Arc::new(Annotator::new()),
    )
}

pub fn detection(x: f32, y: f32, size: f32) -> Detection {
    Detection {
        x,
        y,
        width: size,
        height: size,
        confidence: 0.9,
        landmarks: None,
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 180, 160]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}
