//! Face detection: SCRFD via ONNX Runtime plus the ordered fallback chain
//! the pipeline talks to.
//!
//! SCRFD (Sample and Computation Redistribution for Efficient Face Detection)
//! is decoded anchor-free over three strides, followed by NMS.

use crate::types::{Detection, FaceBox};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no detector backend configured")]
    NoBackends,
    #[error("all detector backends failed: {}", join_failures(.0))]
    AllBackendsFailed(Vec<BackendFailure>),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One failed attempt in the fallback chain.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: String,
    pub error: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

fn join_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A face detection strategy.
pub trait DetectBackend: Send {
    /// Short label used in logs and failure reports.
    fn name(&self) -> &str;

    /// Detect faces in an RGB image, in the backend's native emission order.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Tries each backend in order until one succeeds.
pub struct DetectorAdapter {
    backends: Vec<Box<dyn DetectBackend>>,
}

impl DetectorAdapter {
    pub fn new(backends: Vec<Box<dyn DetectBackend>>) -> Self {
        Self { backends }
    }

    /// Run the raw detections of the first backend that succeeds.
    pub fn detect_raw(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if self.backends.is_empty() {
            return Err(DetectorError::NoBackends);
        }

        let mut failures = Vec::new();
        for backend in self.backends.iter_mut() {
            match backend.detect(image) {
                Ok(detections) => {
                    if !failures.is_empty() {
                        tracing::info!(backend = backend.name(), "fallback detector succeeded");
                    }
                    return Ok(detections);
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "detector backend failed");
                    failures.push(BackendFailure {
                        backend: backend.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(DetectorError::AllBackendsFailed(failures))
    }

    /// Detect faces as pixel boxes in detection order.
    ///
    /// Zero-area boxes are how some backends say "no face"; they are dropped,
    /// so an image without faces yields an empty list.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (width, height) = image.dimensions();
        let faces: Vec<FaceBox> = self
            .detect_raw(image)?
            .iter()
            .map(|d| d.to_face_box(width, height))
            .filter(|f| !f.is_empty())
            .collect();

        tracing::debug!(count = faces.len(), "detection complete");
        Ok(faces)
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Positions of one stride level's tensors in the session outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Decoded output tensors of one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    name: String,
    session: Session,
    input_size: usize,
    /// One entry per element of `SCRFD_STRIDES`.
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load an SCRFD ONNX model; `name` labels it in the fallback chain.
    pub fn load(name: &str, model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() != 3 * SCRFD_STRIDES.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "{} is not an SCRFD export with keypoints: expected 9 outputs, found {}",
                model_path.display(),
                names.len()
            )));
        }

        let slots = map_outputs(&names);
        tracing::info!(backend = name, path = %model_path.display(), ?slots, "detector session ready");

        Ok(Self {
            name: name.to_string(),
            session,
            input_size: SCRFD_INPUT_SIZE,
            slots,
        })
    }

    /// Letterbox the image into the square model input and normalise to the
    /// SCRFD input distribution (NCHW, RGB).
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let size = self.input_size;
        let (width, height) = image.dimensions();
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size as u32);
        let pad_x = (size as u32 - new_w) as f32 / 2.0;
        let pad_y = (size as u32 - new_h) as f32 / 2.0;

        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        // Padding is left at 0.0, which is SCRFD_MEAN after normalisation.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let (off_x, off_y) = (pad_x.floor() as usize, pad_y.floor() as usize);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x as usize + off_x, y as usize + off_y);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }
}

impl DetectBackend for FaceDetector {
    fn name(&self) -> &str {
        &self.name
    }

    /// Detections sorted by descending confidence.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = self.preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let tensor = |slot: usize, stride: usize| {
            outputs[slot]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("output {slot} (stride {stride}): {e}")))
        };

        let mut candidates = Vec::new();
        for (&stride, slots) in SCRFD_STRIDES.iter().zip(&self.slots) {
            let level = StrideOutputs {
                stride,
                scores: tensor(slots.score, stride)?,
                bboxes: tensor(slots.bbox, stride)?,
                kps: tensor(slots.kps, stride)?,
            };
            candidates.extend(decode_stride(&level, self.input_size, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Locate each stride's tensors. Exports that name them `score_8`,
/// `bbox_16`, `kps_32` and so on are matched by name; the insightface
/// release models use anonymous outputs grouped as all scores, then all
/// boxes, then all keypoints.
fn map_outputs(names: &[String]) -> [StrideSlots; 3] {
    let position = |kind: &str, stride: usize| names.iter().position(|n| *n == format!("{kind}_{stride}"));
    let named = |stride: usize| {
        Some(StrideSlots {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (named(8), named(16), named(32)) {
        (Some(s8), Some(s16), Some(s32)) => [s8, s16, s32],
        _ => std::array::from_fn(|level| StrideSlots {
            score: level,
            bbox: level + 3,
            kps: level + 6,
        }),
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    level: &StrideOutputs<'_>,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let stride = level.stride;
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let unmap = |px: f32, py: f32| {
        (
            (px - letterbox.pad_x) / letterbox.scale,
            (py - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = level.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = ((anchor_idx % grid) * stride) as f32;
        let anchor_cy = ((anchor_idx / grid) * stride) as f32;

        // Distances from the anchor: [left, top, right, bottom] * stride
        let Some(off) = level.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let s = stride as f32;
        let (x1, y1) = unmap(anchor_cx - off[0] * s, anchor_cy - off[1] * s);
        let (x2, y2) = unmap(anchor_cx + off[2] * s, anchor_cy + off[3] * s);

        let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| unmap(anchor_cx + k[i * 2] * s, anchor_cy + k[i * 2 + 1] * s))
        });

        detections.push(Detection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Greedy non-maximum suppression; survivors come out most confident first.
fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.into_iter().fold(Vec::new(), |mut kept: Vec<Detection>, det| {
        if kept.iter().all(|k| iou(k, &det) <= iou_threshold) {
            kept.push(det);
        }
        kept
    })
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let overlap = overlap_w * overlap_h;
    let union = a.width * a.height + b.width * b.height - overlap;
    if union > 0.0 {
        overlap / union
    } else {
        0.0
    }
}
