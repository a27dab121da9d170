//! Enrollment: crop a face out of a submitted image and store it as a new
//! gallery reference.

use crate::gallery::{normalize_name, Gallery};
use crate::imageio::{self, ImageInputError};
use crate::types::FaceBox;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("name {0:?} has no usable characters")]
    InvalidName(String),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] ImageInputError),
    #[error("face location {0:?} does not overlap the image")]
    EmptyRegion([i32; 4]),
    #[error("cannot encode face crop: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to save face")]
    StoreFailed,
}

impl EnrollError {
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidName(_) | Self::InvalidImage(_) | Self::EmptyRegion(_)
        )
    }
}

/// Crop `[top, right, bottom, left]` out of `image`, clamped to its bounds.
/// Returns None when nothing of the region lies inside the image.
pub fn crop_location(image: &RgbImage, location: [i32; 4]) -> Option<RgbImage> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let [top, right, bottom, left] = location;
    let (left, right) = (left.clamp(0, w), right.clamp(0, w));
    let (top, bottom) = (top.clamp(0, h), bottom.clamp(0, h));

    let region = FaceBox::from_location([top, right, bottom, left]);
    if region.w <= 0 || region.h <= 0 {
        return None;
    }
    Some(
        image::imageops::crop_imm(
            image,
            region.x as u32,
            region.y as u32,
            region.w as u32,
            region.h as u32,
        )
        .to_image(),
    )
}

/// Store a reference for `name` cut from an encoded image.
///
/// With no location the whole image is stored. The stored file is always
/// JPEG regardless of the input format.
pub fn enroll_face(
    gallery: &Gallery,
    name: &str,
    image_bytes: &[u8],
    location: Option<[i32; 4]>,
) -> Result<(), EnrollError> {
    if normalize_name(name).is_none() {
        return Err(EnrollError::InvalidName(name.to_string()));
    }

    let image = imageio::decode_rgb(image_bytes)?;
    let face = match location {
        Some(loc) => crop_location(&image, loc).ok_or(EnrollError::EmptyRegion(loc))?,
        None => image,
    };
    let jpeg = imageio::encode_jpeg(&face)?;

    if gallery.add_identity(name, &jpeg) {
        Ok(())
    } else {
        Err(EnrollError::StoreFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imageio::tests::png_bytes;

    #[test]
    fn test_crop_inside() {
        let image = RgbImage::new(100, 80);
        let crop = crop_location(&image, [10, 60, 50, 20]).unwrap();
        assert_eq!(crop.dimensions(), (40, 40));
    }

    #[test]
    fn test_crop_clamped_to_bounds() {
        let image = RgbImage::new(100, 80);
        let crop = crop_location(&image, [-10, 150, 90, 70]).unwrap();
        assert_eq!(crop.dimensions(), (30, 80));
    }

    #[test]
    fn test_crop_outside_is_none() {
        let image = RgbImage::new(100, 80);
        assert!(crop_location(&image, [10, 300, 50, 200]).is_none());
        assert!(crop_location(&image, [10, 20, 50, 20]).is_none());
    }

    #[test]
    fn test_enroll_stores_jpeg_crop() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();

        enroll_face(&gallery, "Jane Doe", &png_bytes(64, 64), Some([8, 40, 40, 8])).unwrap();

        let stored = std::fs::read(dir.path().join("jane_doe").join("face_1.jpg")).unwrap();
        assert_eq!(image::guess_format(&stored).unwrap(), image::ImageFormat::Jpeg);
        let crop = imageio::decode_rgb(&stored).unwrap();
        assert_eq!(crop.dimensions(), (32, 32));
        assert!(gallery.is_populated());
    }

    #[test]
    fn test_enroll_whole_image() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        enroll_face(&gallery, "bob", &png_bytes(20, 30), None).unwrap();
        let stored = std::fs::read(dir.path().join("bob").join("face_1.jpg")).unwrap();
        assert_eq!(imageio::decode_rgb(&stored).unwrap().dimensions(), (20, 30));
    }

    #[test]
    fn test_enroll_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();

        let err = enroll_face(&gallery, "../..", &png_bytes(8, 8), None).unwrap_err();
        assert!(matches!(err, EnrollError::InvalidName(_)));
        assert!(err.is_bad_request());

        let err = enroll_face(&gallery, "bob", b"not an image", None).unwrap_err();
        assert!(matches!(err, EnrollError::InvalidImage(_)));

        let err = enroll_face(&gallery, "bob", &png_bytes(8, 8), Some([50, 60, 70, 55])).unwrap_err();
        assert!(matches!(err, EnrollError::EmptyRegion(_)));
        assert!(err.is_bad_request());

        assert!(!gallery.is_populated());
    }
}
