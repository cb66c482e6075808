//! Identity matching
//!
//! Each detected face is normalized, looked up in the store and accepted as
//! the nearest identity only if its distance is strictly below the
//! threshold. Faces in the same frame are classified independently, so one
//! identity may label several boxes.

use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{ClassificationResult, Identity};
use crate::engine::DetectedFace;
use crate::error::ConfigError;
use crate::storage::{Embedding, EmbeddingStore};

/// Maximum accepted embedding distance, validated at construction
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self, ConfigError> {
        if value.is_finite() && value >= 0.0 {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidThreshold(value))
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// `distance < threshold` is a match; equality is not
    pub fn accepts(self, distance: f32) -> bool {
        distance < self.0
    }
}

impl TryFrom<f32> for Threshold {
    type Error = ConfigError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Threshold::new(value)
    }
}

/// Classifies faces against a shared, read-only store
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    store: Arc<EmbeddingStore>,
    threshold: Threshold,
}

impl IdentityMatcher {
    pub fn new(store: Arc<EmbeddingStore>, threshold: Threshold) -> Self {
        Self { store, threshold }
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Change the operating point without reloading the store
    pub fn set_threshold(&mut self, threshold: Threshold) {
        self.threshold = threshold;
    }

    /// Classify with the matcher's configured threshold
    pub fn classify(&self, faces: &[DetectedFace]) -> Vec<ClassificationResult> {
        self.classify_at(faces, self.threshold)
    }

    /// Classify with an explicit threshold
    pub fn classify_at(&self, faces: &[DetectedFace], threshold: Threshold) -> Vec<ClassificationResult> {
        faces
            .iter()
            .map(|face| self.classify_face(face, threshold))
            .collect()
    }

    fn classify_face(&self, face: &DetectedFace, threshold: Threshold) -> ClassificationResult {
        let query = match Embedding::new(face.embedding.clone()) {
            Ok(query) => query,
            Err(e) => {
                warn!("Face at {:?} has an unusable embedding: {}", face.bbox, e);
                return ClassificationResult {
                    identity: Identity::Unknown,
                    distance: f32::INFINITY,
                    bbox: face.bbox,
                };
            }
        };

        let nearest = self.store.nearest(&query);
        let identity = match nearest.identity {
            Some(name) if threshold.accepts(nearest.distance) => Identity::Known(name.to_string()),
            _ => Identity::Unknown,
        };

        debug!(
            "Face {:?}: nearest {:?} at {:.4}, labeled {}",
            face.bbox, nearest.identity, nearest.distance, identity
        );

        ClassificationResult {
            identity,
            distance: nearest.distance,
            bbox: face.bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BoundingBox;

    fn bbox(x: i32) -> BoundingBox {
        BoundingBox { x1: x, y1: 0, x2: x + 10, y2: 10 }
    }

    fn anna_store() -> Arc<EmbeddingStore> {
        let e_a = Embedding::new(vec![1.0, 0.0, 0.0]).unwrap();
        Arc::new(EmbeddingStore::from_entries(vec![("anna".to_string(), vec![e_a])]))
    }

    fn threshold(v: f32) -> Threshold {
        Threshold::new(v).unwrap()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Threshold::new(0.0).is_ok());
        assert_eq!(Threshold::new(-0.1), Err(ConfigError::InvalidThreshold(-0.1)));
        assert!(Threshold::new(f32::INFINITY).is_err());
        assert!(Threshold::try_from(f32::NAN).is_err());
    }

    #[test]
    fn test_exact_match_is_known_at_zero() {
        let matcher = IdentityMatcher::new(anna_store(), threshold(1.2));
        let results = matcher.classify(&[DetectedFace::new(bbox(0), vec![2.0, 0.0, 0.0])]);
        assert_eq!(results[0].identity, Identity::Known("anna".to_string()));
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[0].bbox, bbox(0));
    }

    #[test]
    fn test_distant_face_is_unknown() {
        // cos = -0.125 gives |a - b| = sqrt(2.25) = 1.5
        let cos = -0.125f32;
        let query = vec![cos, (1.0 - cos * cos).sqrt(), 0.0];
        let matcher = IdentityMatcher::new(anna_store(), threshold(1.2));
        let results = matcher.classify(&[DetectedFace::new(bbox(0), query)]);
        assert_eq!(results[0].identity, Identity::Unknown);
        assert!((results[0].distance - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_boundary_distance_equal_to_threshold_is_unknown() {
        // Orthogonal unit vectors are exactly sqrt(2) apart
        let matcher = IdentityMatcher::new(anna_store(), threshold(1.0));
        let face = DetectedFace::new(bbox(0), vec![0.0, 1.0, 0.0]);
        let d = matcher.classify(&[face.clone()])[0].distance;

        assert_eq!(matcher.classify_at(&[face.clone()], threshold(d))[0].identity, Identity::Unknown);
        assert_eq!(
            matcher.classify_at(&[face], threshold(d + 1e-3))[0].identity,
            Identity::Known("anna".to_string())
        );
    }

    #[test]
    fn test_unknown_iff_distance_at_least_threshold() {
        let matcher = IdentityMatcher::new(anna_store(), threshold(1.0));
        let faces: Vec<DetectedFace> = (0..=20)
            .map(|i| {
                let angle = i as f32 * std::f32::consts::PI / 20.0;
                DetectedFace::new(bbox(i), vec![angle.cos(), angle.sin(), 0.0])
            })
            .collect();

        for t in [0.0, 0.3, 0.6, 1.0, 1.2, 1.25, 2.0] {
            for result in matcher.classify_at(&faces, threshold(t)) {
                assert_eq!(result.is_unknown(), result.distance >= t, "t={} d={}", t, result.distance);
            }
        }
    }

    #[test]
    fn test_empty_store_always_unknown() {
        let matcher = IdentityMatcher::new(Arc::new(EmbeddingStore::empty()), threshold(2.0));
        let results = matcher.classify(&[
            DetectedFace::new(bbox(0), vec![1.0, 0.0]),
            DetectedFace::new(bbox(20), vec![0.0, 1.0]),
        ]);
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.identity, Identity::Unknown);
            assert_eq!(result.distance, f32::INFINITY);
        }
    }

    #[test]
    fn test_same_identity_may_match_several_faces() {
        let matcher = IdentityMatcher::new(anna_store(), threshold(0.6));
        let results = matcher.classify(&[
            DetectedFace::new(bbox(0), vec![1.0, 0.05, 0.0]),
            DetectedFace::new(bbox(50), vec![1.0, 0.0, 0.05]),
        ]);
        assert!(results.iter().all(|r| r.identity == Identity::Known("anna".to_string())));
        assert_eq!(results[1].bbox, bbox(50));
    }

    #[test]
    fn test_unusable_embedding_is_unknown() {
        let matcher = IdentityMatcher::new(anna_store(), threshold(1.2));
        let results = matcher.classify(&[DetectedFace::new(bbox(0), vec![0.0, 0.0, 0.0])]);
        assert_eq!(results[0].identity, Identity::Unknown);
        assert_eq!(results[0].distance, f32::INFINITY);
    }

    #[test]
    fn test_threshold_adjustable_without_reload() {
        let mut matcher = IdentityMatcher::new(anna_store(), threshold(0.1));
        let face = DetectedFace::new(bbox(0), vec![1.0, 0.5, 0.0]);
        assert!(matcher.classify(&[face.clone()])[0].is_unknown());

        matcher.set_threshold(threshold(1.2));
        assert!(!matcher.classify(&[face])[0].is_unknown());
    }
}
