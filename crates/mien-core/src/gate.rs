//! Enrollment-deduplication gate.
//!
//! Before a freshly averaged embedding is persisted, the gate checks
//! whether the captured face already matches an existing identity. The
//! thresholds here are stricter than recognition acceptance: a false
//! duplicate-reject blocks a legitimate enrollment, while a false
//! recognition-accept only mislabels a live frame.

use crate::embedding::Embedding;
use crate::error::MatchError;
use crate::identity::Identity;
use crate::matcher::IdentityMatcher;

/// Tiered duplicate-rejection thresholds.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Similarity above which a candidate is a duplicate outright.
    pub sim_high: f32,
    /// Similarity above which a confirmation re-check is required.
    pub sim_mid: f32,
    /// Confirmation re-check threshold against the specific candidate.
    pub sim_confirm: f32,
    /// Distance ceiling a duplicate must also stay under.
    pub dup_distance: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sim_high: 0.82,
            sim_mid: 0.75,
            sim_confirm: 0.78,
            dup_distance: 1.05,
        }
    }
}

/// Verdict on a candidate embedding about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accept,
    DuplicateOfOther {
        identity_id: String,
        identity_name: String,
    },
    AlreadyEnrolled,
}

pub struct EnrollmentGate {
    config: GateConfig,
}

impl EnrollmentGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether `candidate` may be persisted for `target_id`.
    ///
    /// Scans every enrolled identity, the target included — a face that
    /// matches the target itself is `AlreadyEnrolled`, one that matches
    /// anyone else is `DuplicateOfOther`.
    pub fn evaluate(
        &self,
        matcher: &IdentityMatcher,
        candidate: &Embedding,
        target_id: &str,
        roster: &[Identity],
    ) -> Result<GateDecision, MatchError> {
        let Some(scan) = matcher.scan_duplicates(candidate, roster)? else {
            return Ok(GateDecision::Accept);
        };

        let same_face = if scan.similarity > self.config.sim_high {
            true
        } else if scan.similarity > self.config.sim_mid {
            // Borderline: re-check against the specific candidate.
            candidate.cosine_similarity(&scan.stored)? > self.config.sim_confirm
        } else {
            false
        };

        if !(same_face && scan.min_distance < self.config.dup_distance) {
            return Ok(GateDecision::Accept);
        }

        tracing::debug!(
            target_id,
            duplicate_id = %scan.identity_id,
            similarity = scan.similarity,
            min_distance = scan.min_distance,
            "duplicate face detected"
        );

        if scan.identity_id == target_id {
            Ok(GateDecision::AlreadyEnrolled)
        } else {
            Ok(GateDecision::DuplicateOfOther {
                identity_id: scan.identity_id,
                identity_name: scan.identity_name,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherConfig;

    fn enrolled(id: &str, name: &str, values: &[f32]) -> Identity {
        let mut identity = Identity::new(id, name);
        identity.embedding = Some(Embedding::new(values.to_vec()));
        identity
    }

    fn gate() -> EnrollmentGate {
        EnrollmentGate::new(GateConfig::default())
    }

    fn matcher() -> IdentityMatcher {
        IdentityMatcher::new(MatcherConfig::default())
    }

    // Unit vectors with cosine similarity 0.90 to [1, 0].
    const NEAR: [f32; 2] = [0.90, 0.435_889_9];

    #[test]
    fn test_duplicate_of_other_identity() {
        let roster = vec![enrolled("1", "Gourav", &[1.0, 0.0])];
        let candidate = Embedding::new(NEAR.to_vec());
        let decision = gate()
            .evaluate(&matcher(), &candidate, "2", &roster)
            .unwrap();
        assert_eq!(
            decision,
            GateDecision::DuplicateOfOther {
                identity_id: "1".into(),
                identity_name: "Gourav".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_of_target_is_already_enrolled() {
        let roster = vec![enrolled("1", "Gourav", &[1.0, 0.0])];
        let candidate = Embedding::new(NEAR.to_vec());
        let decision = gate()
            .evaluate(&matcher(), &candidate, "1", &roster)
            .unwrap();
        assert_eq!(decision, GateDecision::AlreadyEnrolled);
    }

    #[test]
    fn test_distinct_face_accepted() {
        let roster = vec![enrolled("1", "Gourav", &[1.0, 0.0])];
        let candidate = Embedding::new(vec![0.0, 1.0]);
        let decision = gate()
            .evaluate(&matcher(), &candidate, "2", &roster)
            .unwrap();
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_empty_roster_accepts() {
        let candidate = Embedding::new(vec![1.0, 0.0]);
        let decision = gate().evaluate(&matcher(), &candidate, "1", &[]).unwrap();
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_mid_tier_requires_confirmation() {
        // Similarity 0.80: between sim_mid (0.75) and sim_high (0.82); the
        // re-check yields the same 0.80 > sim_confirm (0.78) → duplicate.
        let roster = vec![enrolled("1", "a", &[0.80, 0.60])];
        let candidate = Embedding::new(vec![1.0, 0.0]);
        let decision = gate()
            .evaluate(&matcher(), &candidate, "2", &roster)
            .unwrap();
        assert!(matches!(decision, GateDecision::DuplicateOfOther { .. }));
    }

    #[test]
    fn test_mid_tier_confirmation_failure_accepts() {
        // Similarity 0.76: above sim_mid but the re-check (0.76) stays
        // below sim_confirm (0.78) → not a duplicate.
        let roster = vec![enrolled("1", "a", &[0.76, 0.649_923])];
        let candidate = Embedding::new(vec![1.0, 0.0]);
        let decision = gate()
            .evaluate(&matcher(), &candidate, "2", &roster)
            .unwrap();
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_distance_guard_blocks_far_duplicates() {
        // Same direction (similarity 1.0) but far in euclidean terms:
        // the distance ceiling keeps it enrollable.
        let roster = vec![enrolled("1", "a", &[3.0, 0.0])];
        let candidate = Embedding::new(vec![1.0, 0.0]);
        let decision = gate()
            .evaluate(&matcher(), &candidate, "2", &roster)
            .unwrap();
        assert_eq!(decision, GateDecision::Accept);
    }
}
