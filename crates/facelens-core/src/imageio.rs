//! Image decoding, JPEG encoding and base64 helpers shared by the
//! pipeline, the batch recognizer and enrollment.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageInputError {
    #[error("image data is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode any supported image format into RGB8.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ImageInputError> {
    if bytes.is_empty() {
        return Err(ImageInputError::Empty);
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Decode a base64 payload. A leading `data:...;base64,` prefix is accepted.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, ImageInputError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = BASE64.decode(payload.trim())?;
    if bytes.is_empty() {
        return Err(ImageInputError::Empty);
    }
    Ok(bytes)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
