//! Merges detector boxes with recognizer hits into labelled face records.
//!
//! The detector and the recognizer each locate faces independently, so a
//! hit is attached to a box when their centroids nearly coincide. Each box
//! takes the *first* qualifying hit in recognizer order, not the closest one.

use crate::types::{FaceBox, FaceRecord, IdentityHit, UNKNOWN_NAME};

/// Centroids must be strictly closer than this, in pixels.
pub const MAX_CENTROID_DISTANCE: f32 = 20.0;

/// Label each box in detection order. Indices are 1-based positions in
/// `faces` and never depend on recognition outcomes.
pub fn correlate(faces: &[FaceBox], hits: &[IdentityHit]) -> Vec<FaceRecord> {
    faces
        .iter()
        .enumerate()
        .map(|(i, face)| {
            let matched = first_qualifying_hit(face, hits);
            FaceRecord {
                index: i + 1,
                name: matched.map_or_else(|| UNKNOWN_NAME.to_string(), |h| h.name.clone()),
                location: face.location(),
                distance: matched.map(|h| h.distance),
            }
        })
        .collect()
}

fn first_qualifying_hit<'a>(face: &FaceBox, hits: &'a [IdentityHit]) -> Option<&'a IdentityHit> {
    let (fx, fy) = face.centroid();
    hits.iter().find(|hit| {
        let (hx, hy) = hit.centroid();
        (fx - hx).hypot(fy - hy) < MAX_CENTROID_DISTANCE && hit.is_acceptable()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::tests::hit;

    #[test]
    fn test_no_faces_no_records() {
        let hits = vec![hit("bob", 0, 0, 10, 10, 0.1)];
        assert!(correlate(&[], &hits).is_empty());
    }

    #[test]
    fn test_no_hits_all_unknown() {
        let faces = vec![FaceBox::new(0, 0, 10, 10), FaceBox::new(50, 50, 10, 10)];
        let records = correlate(&faces, &[]);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_unknown() && r.distance.is_none()));
        assert_eq!(records[0].index, 1);
        assert_eq!(records[1].index, 2);
    }

    #[test]
    fn test_first_qualifying_hit_wins_over_closer_distance() {
        let faces = vec![FaceBox::new(10, 10, 50, 50)];
        let hits = vec![
            hit("bob", 12, 12, 48, 48, 0.9),
            hit("alice", 11, 11, 49, 49, 0.3),
        ];
        let records = correlate(&faces, &hits);
        assert_eq!(records[0].name, "bob");
        assert_eq!(records[0].distance, Some(0.9));
    }

    #[test]
    fn test_centroid_distance_bound_is_strict() {
        let face = FaceBox::new(0, 0, 10, 10);
        // Centroid (5, 5) vs (25, 5): exactly 20px apart.
        let at_bound = vec![hit("bob", 20, 0, 10, 10, 0.0)];
        assert!(correlate(&[face], &at_bound)[0].is_unknown());

        // (5, 5) vs (24.5, 5): just inside.
        let inside = vec![hit("bob", 20, 0, 9, 10, 0.0)];
        assert_eq!(correlate(&[face], &inside)[0].name, "bob");
    }

    #[test]
    fn test_distance_over_threshold_never_matches() {
        let face = FaceBox::new(10, 10, 50, 50);
        let hits = vec![hit("bob", 10, 10, 50, 50, 1.01)];
        let records = correlate(&[face], &hits);
        assert!(records[0].is_unknown());
        assert_eq!(records[0].distance, None);
    }

    #[test]
    fn test_distance_at_threshold_matches() {
        let face = FaceBox::new(10, 10, 50, 50);
        let hits = vec![hit("bob", 10, 10, 50, 50, 1.0)];
        assert_eq!(correlate(&[face], &hits)[0].name, "bob");
    }

    #[test]
    fn test_rejected_first_hit_falls_through_to_next() {
        let face = FaceBox::new(10, 10, 50, 50);
        let hits = vec![
            hit("too_far", 100, 100, 50, 50, 0.1),
            hit("too_weak", 10, 10, 50, 50, 1.5),
            hit("carol", 14, 10, 50, 50, 0.6),
        ];
        assert_eq!(correlate(&[face], &hits)[0].name, "carol");
    }

    #[test]
    fn test_hit_can_label_several_boxes() {
        // Overlapping detections both claim the same hit.
        let faces = vec![FaceBox::new(10, 10, 50, 50), FaceBox::new(12, 12, 50, 50)];
        let hits = vec![hit("bob", 11, 11, 50, 50, 0.2)];
        let records = correlate(&faces, &hits);
        assert_eq!(records[0].name, "bob");
        assert_eq!(records[1].name, "bob");
    }

    #[test]
    fn test_records_follow_detection_order() {
        let faces = vec![FaceBox::new(200, 0, 40, 40), FaceBox::new(0, 0, 40, 40)];
        let hits = vec![hit("left", 0, 0, 40, 40, 0.2), hit("right", 200, 0, 40, 40, 0.4)];
        let records = correlate(&faces, &hits);
        assert_eq!((records[0].index, records[0].name.as_str()), (1, "right"));
        assert_eq!((records[1].index, records[1].name.as_str()), (2, "left"));
        assert_eq!(records[0].location, [0, 240, 40, 200]);
    }
}
