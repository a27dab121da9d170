//! Embedding-distance matcher: the concrete `find` behind the recognizer.

use crate::detector::DetectBackend;
use crate::gallery::Gallery;
use crate::index::{GalleryIndex, IndexEntry};
use crate::recognizer::{Embed, FaceMatcher, RecognizerError};
use crate::types::{Detection, Embedding, IdentityHit};
use image::RgbImage;

/// Re-detects faces with its own detector, embeds each, and ranks the
/// gallery index by L2 distance.
///
/// Images where the detector finds nothing are embedded whole, so tight
/// face crops still get a candidate.
pub struct EmbeddingMatcher {
    detector: Box<dyn DetectBackend>,
    embedder: Box<dyn Embed>,
}

impl EmbeddingMatcher {
    pub fn new(detector: Box<dyn DetectBackend>, embedder: Box<dyn Embed>) -> Self {
        Self { detector, embedder }
    }

    fn load_index(&mut self, gallery: &Gallery) -> Result<GalleryIndex, RecognizerError> {
        let model = self.embedder.model_version().to_string();
        let detector = &mut self.detector;
        let embedder = &mut self.embedder;

        let index = GalleryIndex::load_or_build(gallery, &model, |reference| {
            let decoded = std::fs::read(&reference.path)
                .map_err(image::ImageError::IoError)
                .and_then(|bytes| image::load_from_memory(&bytes));
            let image = match decoded {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %reference.path.display(), error = %e, "unreadable reference image");
                    return None;
                }
            };
            let face = match detector.detect(&image) {
                Ok(faces) => faces
                    .into_iter()
                    .find(|d| !d.to_face_box(image.width(), image.height()).is_empty()),
                Err(e) => {
                    tracing::warn!(path = %reference.path.display(), error = %e, "reference detection failed");
                    None
                }
            }
            .unwrap_or_else(|| whole_image(&image));

            embedder
                .embed(&image, &face)
                .map_err(|e| {
                    tracing::warn!(path = %reference.path.display(), error = %e, "reference embedding failed");
                })
                .ok()
        })?;
        Ok(index)
    }
}

impl FaceMatcher for EmbeddingMatcher {
    /// One hit per re-detected face (its closest reference), best-first.
    /// Equal distances keep detection order.
    fn find(&mut self, image: &RgbImage, gallery: &Gallery) -> Result<Vec<IdentityHit>, RecognizerError> {
        let index = self.load_index(gallery)?;
        if index.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut faces = self.detector.detect(image)?;
        if faces.is_empty() {
            faces.push(whole_image(image));
        }

        let (width, height) = image.dimensions();
        let mut hits = Vec::with_capacity(faces.len());
        for face in &faces {
            let rect = face.to_face_box(width, height);
            if rect.is_empty() {
                continue;
            }
            let probe = match self.embedder.embed(image, face) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "probe embedding failed; skipping face");
                    continue;
                }
            };
            if let Some((entry, distance)) = closest(&probe, &index.entries) {
                hits.push(IdentityHit {
                    name: entry.identity.clone(),
                    x: rect.x,
                    y: rect.y,
                    w: rect.w,
                    h: rect.h,
                    distance,
                });
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }
}

fn whole_image(image: &RgbImage) -> Detection {
    Detection {
        x: 0.0,
        y: 0.0,
        width: image.width() as f32,
        height: image.height() as f32,
        confidence: 0.0,
        landmarks: None,
    }
}

/// Nearest index entry; ties keep the earliest entry.
fn closest<'a>(probe: &Embedding, entries: &'a [IndexEntry]) -> Option<(&'a IndexEntry, f32)> {
    entries
        .iter()
        .map(|entry| (entry, probe.l2_distance(&entry.embedding)))
        .fold(None, |best, (entry, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((entry, d)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::{make_det, StaticBackend};
    use crate::types::Embedding;
    use image::Rgb;
    use std::path::PathBuf;

    /// Embeds a face as the mean colour of its box.
    struct MeanColourEmbedder;

    impl Embed for MeanColourEmbedder {
        fn model_version(&self) -> &str {
            "mean-colour"
        }

        fn embed(&mut self, image: &RgbImage, face: &Detection) -> Result<Embedding, RecognizerError> {
            let rect = face.to_face_box(image.width(), image.height());
            let mut sum = [0f32; 3];
            let mut n = 0f32;
            for y in rect.y..rect.y + rect.h {
                for x in rect.x..rect.x + rect.w {
                    let p = image.get_pixel(x as u32, y as u32);
                    for c in 0..3 {
                        sum[c] += p[c] as f32;
                    }
                    n += 1.0;
                }
            }
            Ok(Embedding {
                values: sum.iter().map(|s| s / n.max(1.0) + 1.0).collect(),
                model_version: None,
            })
        }
    }

    fn solid_png(colour: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(16, 16, Rgb(colour));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn entry(identity: &str, values: Vec<f32>) -> IndexEntry {
        IndexEntry {
            identity: identity.into(),
            path: PathBuf::from(identity),
            embedding: Embedding { values, model_version: None },
        }
    }

    #[test]
    fn test_closest_prefers_smallest_distance() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let entries = vec![entry("far", vec![0.0, 1.0]), entry("near", vec![1.0, 0.1])];
        let (best, d) = closest(&probe, &entries).unwrap();
        assert_eq!(best.identity, "near");
        assert!(d < 0.2);
    }

    #[test]
    fn test_closest_tie_keeps_first() {
        let probe = Embedding { values: vec![1.0, 0.0], model_version: None };
        let entries = vec![entry("first", vec![2.0, 0.0]), entry("second", vec![3.0, 0.0])];
        assert_eq!(closest(&probe, &entries).unwrap().0.identity, "first");
    }

    #[test]
    fn test_closest_empty() {
        let probe = Embedding { values: vec![1.0], model_version: None };
        assert!(closest(&probe, &[]).is_none());
    }

    #[test]
    fn test_find_names_whole_crop_when_nothing_detected() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        // Reference files are named .jpg but decoded by content.
        assert!(gallery.add_identity("Red", &solid_png([200, 10, 10])));
        assert!(gallery.add_identity("Blue", &solid_png([10, 10, 200])));

        let mut matcher = EmbeddingMatcher::new(
            Box::new(StaticBackend::ok("none", vec![])),
            Box::new(MeanColourEmbedder),
        );
        let probe = RgbImage::from_pixel(20, 20, Rgb([190, 20, 15]));
        let hits = matcher.find(&probe, &gallery).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "red");
        assert_eq!((hits[0].x, hits[0].y, hits[0].w, hits[0].h), (0, 0, 20, 20));
        assert!(gallery.index_path().exists());
    }

    #[test]
    fn test_find_one_hit_per_detected_face() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Red", &solid_png([200, 10, 10])));
        assert!(gallery.add_identity("Blue", &solid_png([10, 10, 200])));

        // Left half exactly red, right half a washed-out blue.
        let probe = RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 { Rgb([200, 10, 10]) } else { Rgb([60, 40, 170]) }
        });
        // The detector boxes the two halves; on 16px references it returns
        // the same boxes clipped, which still cover a single colour.
        let mut matcher = EmbeddingMatcher::new(
            Box::new(StaticBackend::ok(
                "halves",
                vec![make_det(22.0, 2.0, 10.0, 10.0, 0.9), make_det(2.0, 2.0, 10.0, 10.0, 0.8)],
            )),
            Box::new(MeanColourEmbedder),
        );
        let hits = matcher.find(&probe, &gallery).unwrap();

        // Detected right-then-left, reported best match first.
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["red", "blue"]);
        assert_eq!(hits[0].x, 2);
        assert_eq!(hits[1].x, 22);
        assert!(hits[0].distance < hits[1].distance);
        assert!(hits[1].distance < 0.5);
    }

    #[test]
    fn test_find_with_no_usable_references() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        assert!(gallery.add_identity("Broken", b"not an image"));

        let mut matcher = EmbeddingMatcher::new(
            Box::new(StaticBackend::ok("none", vec![])),
            Box::new(MeanColourEmbedder),
        );
        let hits = matcher.find(&RgbImage::new(8, 8), &gallery).unwrap();
        assert!(hits.is_empty());
    }
}
