//! Single-pass best-match scan over the enrolled roster.

use crate::embedding::Embedding;
use crate::error::MatchError;
use crate::identity::{Identity, MatchResult};

/// Ranking key for recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Maximize cosine similarity; accept above `accept_similarity`.
    Similarity,
    /// Minimize euclidean distance; accept below `accept_distance`.
    Distance,
}

/// Recognition acceptance thresholds.
///
/// Empirically tuned values — configuration, not law.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub accept_similarity: f32,
    pub accept_distance: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            accept_similarity: 0.55,
            accept_distance: 1.0,
        }
    }
}

/// Best candidate found by a duplicate-detection scan.
#[derive(Debug, Clone)]
pub struct DuplicateScan {
    pub identity_id: String,
    pub identity_name: String,
    /// Similarity of the best-by-similarity candidate.
    pub similarity: f32,
    /// Minimum distance over every enrolled candidate — not necessarily
    /// the best-by-similarity one.
    pub min_distance: f32,
    /// Stored embedding of the best candidate, for confirmation re-checks.
    pub stored: Embedding,
}

pub struct IdentityMatcher {
    config: MatcherConfig,
}

impl IdentityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Find the best match for `probe` among `candidates`.
    ///
    /// Candidates without a stored embedding are skipped. Every remaining
    /// candidate is scored in one pass — no early exit, the global best is
    /// required. Strict comparisons make the first-seen candidate win ties;
    /// callers must supply a deterministically ordered snapshot.
    pub fn find_best(
        &self,
        probe: &Embedding,
        candidates: &[Identity],
        mode: MatchMode,
    ) -> Result<MatchResult, MatchError> {
        let mut best: Option<(&Identity, f32, f32)> = None;
        let mut scanned = 0usize;

        for candidate in candidates {
            let Some(stored) = candidate.embedding.as_ref() else {
                continue;
            };
            let similarity = probe.cosine_similarity(stored)?;
            let distance = probe.euclidean_distance(stored)?;
            scanned += 1;

            let better = match best {
                None => true,
                Some((_, best_sim, best_dist)) => match mode {
                    MatchMode::Similarity => similarity > best_sim,
                    MatchMode::Distance => distance < best_dist,
                },
            };
            if better {
                best = Some((candidate, similarity, distance));
            }
        }

        let Some((winner, similarity, distance)) = best else {
            // Nobody enrolled: reported as unknown, never an error.
            return Ok(MatchResult {
                accepted: false,
                similarity: 0.0,
                distance: 0.0,
                identity_id: None,
                identity_name: None,
                scanned,
            });
        };

        let accepted = match mode {
            MatchMode::Similarity => similarity > self.config.accept_similarity,
            MatchMode::Distance => distance < self.config.accept_distance,
        };

        Ok(MatchResult {
            accepted,
            similarity,
            distance,
            identity_id: accepted.then(|| winner.id.clone()),
            identity_name: accepted.then(|| winner.name.clone()),
            scanned,
        })
    }

    /// Duplicate-detection scan: the best candidate by similarity plus the
    /// global minimum distance across all enrolled candidates.
    ///
    /// Returns `None` when nothing is enrolled.
    pub fn scan_duplicates(
        &self,
        probe: &Embedding,
        candidates: &[Identity],
    ) -> Result<Option<DuplicateScan>, MatchError> {
        let mut best: Option<(&Identity, f32, &Embedding)> = None;
        let mut min_distance = f32::INFINITY;

        for candidate in candidates {
            let Some(stored) = candidate.embedding.as_ref() else {
                continue;
            };
            let similarity = probe.cosine_similarity(stored)?;
            let distance = probe.euclidean_distance(stored)?;
            if distance < min_distance {
                min_distance = distance;
            }

            let better = match best {
                None => true,
                Some((_, best_sim, _)) => similarity > best_sim,
            };
            if better {
                best = Some((candidate, similarity, stored));
            }
        }

        Ok(best.map(|(identity, similarity, stored)| DuplicateScan {
            identity_id: identity.id.clone(),
            identity_name: identity.name.clone(),
            similarity,
            min_distance,
            stored: stored.clone(),
        }))
    }
}
