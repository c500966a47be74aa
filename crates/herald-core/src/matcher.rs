//! Scoring policies for comparing a probe embedding against the gallery.
//!
//! Exactly one policy is deployed per process and held fixed: the two
//! thresholds are not interchangeable (a cosine cutoff around 0.55 has no
//! meaning as a Euclidean distance cutoff and vice versa).

use crate::types::{Embedding, IdentityRecord, MatchResult};

/// Default operating threshold for [`CosineMatcher`].
pub const DEFAULT_COSINE_THRESHOLD: f32 = 0.55;

/// Default maximum-distance cutoff for [`EuclideanMatcher`].
pub const DEFAULT_EUCLIDEAN_THRESHOLD: f32 = 0.8;

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher: Send {
    /// Compare `probe` against every gallery entry and report the arg-max.
    ///
    /// An empty gallery reports "unknown" with score 0.0 — that is data,
    /// not an error.
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult;

    /// Map a raw score to a display confidence in [0, 1].
    fn display_confidence(&self, score: f32) -> f32;
}

/// Cosine similarity matcher with constant-time gallery traversal.
///
/// Always iterates ALL gallery entries to prevent timing side-channels
/// that could leak gallery size or match position. Threshold is a minimum
/// similarity in (0, 1); a match passes when `score > threshold`.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        // Constant-time: always iterate every entry, no early exit.
        // Gallery order is stable (sorted by name), so ties break
        // deterministically to the first of equals.
        for (i, record) in gallery.iter().enumerate() {
            let score = probe.similarity(&record.reference);
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_score > threshold => MatchResult {
                identity: Some(gallery[idx].name.clone()),
                score: best_score,
                passed_threshold: true,
            },
            Some(_) => MatchResult::unknown(best_score),
            None => MatchResult::unknown(0.0),
        }
    }

    fn display_confidence(&self, score: f32) -> f32 {
        score.clamp(0.0, 1.0)
    }
}

/// Euclidean distance matcher for L2-normalized embeddings.
///
/// The threshold is a maximum-distance cutoff (lower distance = more
/// similar); the reported score is the negated distance so that higher
/// remains better across both policies.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            let distance = probe.euclidean_distance(&record.reference);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance < threshold => MatchResult {
                identity: Some(gallery[idx].name.clone()),
                score: -best_distance,
                passed_threshold: true,
            },
            Some(_) => MatchResult::unknown(-best_distance),
            None => MatchResult::unknown(0.0),
        }
    }

    fn display_confidence(&self, score: f32) -> f32 {
        // score is the negated distance
        (1.0 + score).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(name: &str, values: Vec<f32>) -> IdentityRecord {
        IdentityRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            reference: Embedding::new(values),
            sample_count: 1,
            greeting: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_matcher_compares_whole_gallery() {
        // Best match is the last entry — every entry must be visited.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            record("decoy1", vec![0.0, 1.0, 0.0]),
            record("decoy2", vec![0.0, 0.0, 1.0]),
            record("match", vec![1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(result.passed_threshold);
        assert_eq!(result.identity.as_deref(), Some("match"));
        assert!((result.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_below_threshold_is_unknown() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![record("other", vec![0.0, 1.0, 0.0])];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.passed_threshold);
        assert!(result.identity.is_none());
        assert!(result.score.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = CosineMatcher.compare(&probe, &[], 0.5);
        assert!(!result.passed_threshold);
        assert!(result.identity.is_none());
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_cosine_matcher_opposite_probe_is_unknown() {
        // Toy scenario: "Alice" enrolled as the mean of [1,0],[0,1],[1,1].
        let gallery = vec![record("Alice", vec![2.0 / 3.0, 2.0 / 3.0])];

        let exact = CosineMatcher.compare(&Embedding::new(vec![2.0 / 3.0, 2.0 / 3.0]), &gallery, 0.55);
        assert!(exact.passed_threshold);
        assert_eq!(exact.identity.as_deref(), Some("Alice"));
        assert!((exact.score - 1.0).abs() < 1e-6);

        let opposite = CosineMatcher.compare(&Embedding::new(vec![-1.0, -1.0]), &gallery, 0.55);
        assert!(!opposite.passed_threshold);
        assert!(opposite.identity.is_none());
        assert!((opposite.score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_tie_breaks_to_first_of_equals() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            record("first", vec![1.0, 0.0]),
            record("second", vec![2.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert_eq!(result.identity.as_deref(), Some("first"));
    }

    #[test]
    fn test_euclidean_matcher_exact_match() {
        let probe = Embedding::new(vec![0.6, 0.8]);
        let gallery = vec![
            record("near", vec![0.6, 0.8]),
            record("far", vec![-0.6, -0.8]),
        ];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.8);
        assert!(result.passed_threshold);
        assert_eq!(result.identity.as_deref(), Some("near"));
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_euclidean_matcher_beyond_cutoff_is_unknown() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![record("far", vec![-1.0, 0.0])];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.8);
        assert!(!result.passed_threshold);
        assert!(result.identity.is_none());
        assert!((result.score + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_display_confidence() {
        let m = EuclideanMatcher;
        assert!((m.display_confidence(0.0) - 1.0).abs() < 1e-6);
        assert!((m.display_confidence(-0.4) - 0.6).abs() < 1e-6);
        // Distances past 1.0 floor at zero rather than going negative.
        assert_eq!(m.display_confidence(-1.7), 0.0);
    }
}
