//! Draws face boxes and labels onto the analyzed image.

use crate::gallery::display_name;
use crate::types::{FaceBox, FaceRecord};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

const BOX_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const SHADOW_COLOUR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 3;
const LABEL_SCALE: f32 = 15.0;
const LABEL_OFFSET_Y: i32 = 20;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("cannot read font {path}: {source}")]
    FontRead {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid font file: {0}")]
    InvalidFont(String),
}

/// Face annotation. Labels need a font; without one only boxes are drawn.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> Result<Self, RenderError> {
        let data = std::fs::read(path).map_err(|source| RenderError::FontRead {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| RenderError::InvalidFont(path.display().to_string()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// `#<index>: <Display Name>`.
    pub fn label(record: &FaceRecord) -> String {
        format!("#{}: {}", record.index, display_name(&record.name))
    }

    pub fn annotate(&self, image: &mut RgbImage, faces: &[FaceRecord]) {
        for record in faces {
            let face = FaceBox::from_location(record.location);
            draw_box(image, &face);

            if let Some(font) = &self.font {
                let text = Self::label(record);
                let scale = PxScale::from(LABEL_SCALE);
                let (x, y) = (face.x, face.y - LABEL_OFFSET_Y);
                for (dx, dy) in [(1, -1), (-1, 1), (1, 1), (-1, -1)] {
                    draw_text_mut(image, SHADOW_COLOUR, x + dx, y + dy, scale, font, &text);
                }
                draw_text_mut(image, BOX_COLOUR, x, y, scale, font, &text);
            }
        }
    }
}

/// Outline drawn inward from the box edge.
fn draw_box(image: &mut RgbImage, face: &FaceBox) {
    for t in 0..BOX_THICKNESS {
        let (w, h) = (face.w - 2 * t, face.h - 2 * t);
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(face.x + t, face.y + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOUR);
    }
}
