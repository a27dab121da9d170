use serde::{Deserialize, Serialize};

/// Name reported for a detected face that no gallery identity claims.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Largest embedding distance accepted as a match (inclusive).
pub const MATCH_DISTANCE_THRESHOLD: f32 = 1.0;

/// Raw detector output in image space, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl Detection {
    /// Snap to an integer pixel rectangle clamped to the image bounds.
    pub fn to_face_box(&self, image_width: u32, image_height: u32) -> FaceBox {
        let max_x = image_width as f32;
        let max_y = image_height as f32;
        let x1 = self.x.clamp(0.0, max_x).round();
        let y1 = self.y.clamp(0.0, max_y).round();
        let x2 = (self.x + self.width).clamp(0.0, max_x).round();
        let y2 = (self.y + self.height).clamp(0.0, max_y).round();
        FaceBox {
            x: x1 as i32,
            y: y1 as i32,
            w: (x2 - x1) as i32,
            h: (y2 - y1) as i32,
        }
    }
}

/// A detected face rectangle, origin top-left. Carries no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn centroid(&self) -> (f32, f32) {
        centroid(self.x, self.y, self.w, self.h)
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// `[top, right, bottom, left]`, the axis order the HTTP API exposes.
    pub fn location(&self) -> [i32; 4] {
        [self.y, self.x + self.w, self.y + self.h, self.x]
    }

    /// Inverse of [`location`](Self::location).
    pub fn from_location([top, right, bottom, left]: [i32; 4]) -> Self {
        Self {
            x: left,
            y: top,
            w: right - left,
            h: bottom - top,
        }
    }
}

/// A candidate identity for one face the recognizer found on its own.
///
/// The box is the recognizer's re-detection, not the detector's, so it only
/// approximately lines up with the corresponding [`FaceBox`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityHit {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    /// Embedding distance to the closest reference image. Lower is more similar.
    pub distance: f32,
}

impl IdentityHit {
    pub fn centroid(&self) -> (f32, f32) {
        centroid(self.x, self.y, self.w, self.h)
    }

    pub fn is_acceptable(&self) -> bool {
        self.distance <= MATCH_DISTANCE_THRESHOLD
    }
}

fn centroid(x: i32, y: i32, w: i32, h: i32) -> (f32, f32) {
    (x as f32 + w as f32 / 2.0, y as f32 + h as f32 / 2.0)
}

/// One labelled face in an analyzed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    /// 1-based position in detection order.
    pub index: usize,
    pub name: String,
    /// `[top, right, bottom, left]`.
    pub location: [i32; 4],
    pub distance: Option<f32>,
}

impl FaceRecord {
    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_NAME
    }
}

/// One classified entry of a batch of pre-cropped faces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// 1-based position in input order.
    pub index: usize,
    pub name: String,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Euclidean distance between the L2-normalised forms of both embeddings.
    ///
    /// Ranges over [0, 2]; 0 for identical directions.
    pub fn l2_distance(&self, other: &Embedding) -> f32 {
        let norm_a = l2_norm(&self.values);
        let norm_b = l2_norm(&other.values);
        if norm_a == 0.0 || norm_b == 0.0 {
            return f32::INFINITY;
        }

        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a / norm_a - b / norm_b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
