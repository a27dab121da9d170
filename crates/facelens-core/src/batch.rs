//! Classification of already-cropped face images, one identity per crop.

use crate::gallery::Gallery;
use crate::imageio;
use crate::recognizer::RecognizerAdapter;
use crate::types::{BatchRecord, IdentityHit, UNKNOWN_NAME};

/// Name each base64-encoded crop against the gallery, in input order.
///
/// A crop that cannot be decoded or recognised is reported as unknown; the
/// rest of the batch is unaffected.
pub fn recognize_batch(
    recognizer: &mut RecognizerAdapter,
    gallery: &Gallery,
    faces_b64: &[String],
) -> Vec<BatchRecord> {
    let populated = gallery.is_populated();
    if !populated {
        tracing::debug!(count = faces_b64.len(), "gallery is empty; batch is all unknown");
    }

    faces_b64
        .iter()
        .enumerate()
        .map(|(i, data)| {
            let name = if populated {
                classify(recognizer, gallery, data, i + 1)
            } else {
                UNKNOWN_NAME.to_string()
            };
            BatchRecord { index: i + 1, name }
        })
        .collect()
}

fn classify(recognizer: &mut RecognizerAdapter, gallery: &Gallery, data: &str, index: usize) -> String {
    let image = match imageio::decode_base64(data).and_then(|bytes| imageio::decode_rgb(&bytes)) {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(index, error = %e, "undecodable face crop");
            return UNKNOWN_NAME.to_string();
        }
    };

    best_hit(&recognizer.recognize(&image, gallery))
        .filter(|hit| hit.is_acceptable())
        .map_or_else(|| UNKNOWN_NAME.to_string(), |hit| hit.name.clone())
}

/// Smallest distance; the earlier hit wins a tie.
fn best_hit(hits: &[IdentityHit]) -> Option<&IdentityHit> {
    hits.iter().fold(None, |best: Option<&IdentityHit>, hit| match best {
        Some(b) if b.distance <= hit.distance => Some(b),
        _ => Some(hit),
    })
}
