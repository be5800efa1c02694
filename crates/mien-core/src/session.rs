//! Multi-shot enrollment capture session.
//!
//! Collects several embeddings for one subject, enforces capture spacing,
//! and produces a single representative vector. State machine:
//! `Idle → Capturing → Committing → Done`, with `cancel` returning to
//! `Idle` from anywhere. The session never touches the store — the commit
//! result carries the representative vector for the caller to persist, so
//! cancellation at any point leaves no partial state behind.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::embedding::Embedding;
use crate::error::MatchError;
use crate::gate::{EnrollmentGate, GateDecision};
use crate::identity::Identity;
use crate::matcher::IdentityMatcher;

pub const DEFAULT_SAMPLES_REQUIRED: usize = 3;
pub const DEFAULT_MIN_CAPTURE_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Samples accumulated before the session commits.
    pub samples_required: usize,
    /// Minimum spacing between accepted captures.
    pub min_capture_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            samples_required: DEFAULT_SAMPLES_REQUIRED,
            min_capture_interval: DEFAULT_MIN_CAPTURE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Committing,
    Done,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("an enrollment session is already active")]
    AlreadyActive,
    #[error("session has not accumulated enough samples to commit")]
    NotCommitting,
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Outcome of offering one captured embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum Offer {
    /// Sample accepted; more are needed.
    Captured { count: usize, required: usize },
    /// Arrived before the spacing interval elapsed; not counted.
    TooSoon,
    /// Session is not capturing; sample discarded.
    NotCapturing,
    /// All samples are in; the session moved to `Committing`.
    ReadyToCommit,
}

/// Outcome of the commit procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Gate accepted — persist `representative` for `identity_id`.
    Committed {
        identity_id: String,
        representative: Embedding,
    },
    /// Face already enrolled under a different identity.
    DuplicateOfOther {
        identity_id: String,
        identity_name: String,
    },
    /// Face already enrolled under the target itself.
    AlreadyEnrolled,
}

pub struct EnrollmentSession {
    config: SessionConfig,
    state: SessionState,
    target_id: Option<String>,
    allow_reenroll: bool,
    samples: Vec<Embedding>,
    last_capture: Option<Instant>,
}

impl EnrollmentSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            target_id: None,
            allow_reenroll: false,
            samples: Vec::new(),
            last_capture: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn samples_held(&self) -> usize {
        self.samples.len()
    }

    pub fn samples_required(&self) -> usize {
        self.config.samples_required
    }

    /// Begin capturing for `target_id`.
    ///
    /// `allow_reenroll` lets the eventual commit overwrite the target's own
    /// embedding — the explicit override flow; re-enrollment never happens
    /// implicitly. An active session must be cancelled first.
    pub fn start(
        &mut self,
        target_id: impl Into<String>,
        allow_reenroll: bool,
    ) -> Result<(), SessionError> {
        if matches!(self.state, SessionState::Capturing | SessionState::Committing) {
            return Err(SessionError::AlreadyActive);
        }
        self.target_id = Some(target_id.into());
        self.allow_reenroll = allow_reenroll;
        self.samples.clear();
        self.last_capture = None;
        self.state = SessionState::Capturing;
        Ok(())
    }

    /// Offer one captured embedding observed at `now`.
    ///
    /// Valid only while `Capturing`; otherwise the sample is discarded
    /// without a state change. A sample arriving before the spacing
    /// interval has elapsed is not counted. When the configured number of
    /// samples is reached, the session transitions to `Committing` and the
    /// caller must run `commit` within the same logical step.
    pub fn offer(&mut self, sample: Embedding, now: Instant) -> Offer {
        if self.state != SessionState::Capturing {
            return Offer::NotCapturing;
        }
        if let Some(last) = self.last_capture {
            if now.duration_since(last) < self.config.min_capture_interval {
                return Offer::TooSoon;
            }
        }

        self.samples.push(sample);
        self.last_capture = Some(now);

        if self.samples.len() >= self.config.samples_required {
            self.state = SessionState::Committing;
            return Offer::ReadyToCommit;
        }
        Offer::Captured {
            count: self.samples.len(),
            required: self.config.samples_required,
        }
    }

    /// Run the commit procedure: average the samples, L2-normalize the
    /// average (the single normalization each stored embedding receives),
    /// and let the gate decide against a roster snapshot.
    ///
    /// Accepted → `Done`; the representative vector is returned for
    /// persistence. Rejected or errored → `Idle`; nothing to persist.
    pub fn commit(
        &mut self,
        matcher: &IdentityMatcher,
        gate: &EnrollmentGate,
        roster: &[Identity],
    ) -> Result<CommitOutcome, SessionError> {
        if self.state != SessionState::Committing {
            return Err(SessionError::NotCommitting);
        }

        let result = self.run_commit(matcher, gate, roster);
        match &result {
            Ok(CommitOutcome::Committed { .. }) => self.state = SessionState::Done,
            _ => self.reset(),
        }
        result
    }

    fn run_commit(
        &self,
        matcher: &IdentityMatcher,
        gate: &EnrollmentGate,
        roster: &[Identity],
    ) -> Result<CommitOutcome, SessionError> {
        let target_id = self
            .target_id
            .clone()
            .ok_or(SessionError::NotCommitting)?;

        let representative = Embedding::average(&self.samples)?.l2_normalize();

        match gate.evaluate(matcher, &representative, &target_id, roster)? {
            GateDecision::Accept => Ok(CommitOutcome::Committed {
                identity_id: target_id,
                representative,
            }),
            GateDecision::AlreadyEnrolled if self.allow_reenroll => {
                tracing::debug!(target_id = %target_id, "re-enrollment override");
                Ok(CommitOutcome::Committed {
                    identity_id: target_id,
                    representative,
                })
            }
            GateDecision::AlreadyEnrolled => Ok(CommitOutcome::AlreadyEnrolled),
            GateDecision::DuplicateOfOther {
                identity_id,
                identity_name,
            } => Ok(CommitOutcome::DuplicateOfOther {
                identity_id,
                identity_name,
            }),
        }
    }

    /// Abandon the session from any state, discarding partial captures.
    /// Safe to call at any time, including mid-commit.
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.target_id = None;
        self.allow_reenroll = false;
        self.samples.clear();
        self.last_capture = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateConfig;
    use crate::matcher::MatcherConfig;

    const INTERVAL: Duration = Duration::from_millis(1500);

    fn session() -> EnrollmentSession {
        EnrollmentSession::new(SessionConfig {
            samples_required: 3,
            min_capture_interval: INTERVAL,
        })
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn enrolled(id: &str, name: &str, values: &[f32]) -> Identity {
        let mut identity = Identity::new(id, name);
        identity.embedding = Some(Embedding::new(values.to_vec()));
        identity
    }

    fn matcher() -> IdentityMatcher {
        IdentityMatcher::new(MatcherConfig::default())
    }

    fn gate() -> EnrollmentGate {
        EnrollmentGate::new(GateConfig::default())
    }

    #[test]
    fn test_three_spaced_offers_reach_committing() {
        let mut s = session();
        s.start("1", false).unwrap();
        let t0 = Instant::now();

        assert_eq!(
            s.offer(emb(&[1.0, 0.0]), t0),
            Offer::Captured {
                count: 1,
                required: 3
            }
        );
        assert_eq!(
            s.offer(emb(&[1.0, 0.0]), t0 + INTERVAL),
            Offer::Captured {
                count: 2,
                required: 3
            }
        );
        assert_eq!(s.offer(emb(&[1.0, 0.0]), t0 + 2 * INTERVAL), Offer::ReadyToCommit);
        assert_eq!(s.state(), SessionState::Committing);
    }

    #[test]
    fn test_fourth_offer_is_noop() {
        let mut s = session();
        s.start("1", false).unwrap();
        let t0 = Instant::now();
        for i in 0..3 {
            s.offer(emb(&[1.0, 0.0]), t0 + i * INTERVAL);
        }
        assert_eq!(
            s.offer(emb(&[0.0, 1.0]), t0 + 3 * INTERVAL),
            Offer::NotCapturing
        );
        assert_eq!(s.samples_held(), 3);
    }

    #[test]
    fn test_rapid_offers_only_register_first() {
        let mut s = session();
        s.start("1", false).unwrap();
        let t0 = Instant::now();

        s.offer(emb(&[1.0, 0.0]), t0);
        assert_eq!(
            s.offer(emb(&[1.0, 0.0]), t0 + Duration::from_millis(300)),
            Offer::TooSoon
        );
        assert_eq!(s.samples_held(), 1);
    }

    #[test]
    fn test_offer_while_idle_rejected() {
        let mut s = session();
        assert_eq!(s.offer(emb(&[1.0, 0.0]), Instant::now()), Offer::NotCapturing);
    }

    #[test]
    fn test_cancel_discards_partial_captures() {
        let mut s = session();
        s.start("1", false).unwrap();
        s.offer(emb(&[1.0, 0.0]), Instant::now());
        s.cancel();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.samples_held(), 0);
        assert!(s.target_id().is_none());
    }

    #[test]
    fn test_start_while_capturing_rejected() {
        let mut s = session();
        s.start("1", false).unwrap();
        assert_eq!(s.start("2", false), Err(SessionError::AlreadyActive));
        assert_eq!(s.target_id(), Some("1"));
    }

    #[test]
    fn test_restart_clears_previous_samples() {
        let mut s = session();
        s.start("1", false).unwrap();
        s.offer(emb(&[1.0, 0.0]), Instant::now());
        s.cancel();
        s.start("2", false).unwrap();
        assert_eq!(s.samples_held(), 0);
        assert_eq!(s.target_id(), Some("2"));
    }

    fn fill(s: &mut EnrollmentSession, values: &[f32]) {
        let t0 = Instant::now();
        for i in 0..3 {
            s.offer(emb(values), t0 + i * INTERVAL);
        }
    }

    #[test]
    fn test_commit_accept_reaches_done_with_normalized_representative() {
        let mut s = session();
        s.start("1", false).unwrap();
        fill(&mut s, &[3.0, 4.0]);

        let outcome = s.commit(&matcher(), &gate(), &[]).unwrap();
        let CommitOutcome::Committed {
            identity_id,
            representative,
        } = outcome
        else {
            panic!("expected commit");
        };
        assert_eq!(identity_id, "1");
        assert!((representative.values[0] - 0.6).abs() < 1e-6);
        assert!((representative.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(s.state(), SessionState::Done);
    }

    #[test]
    fn test_commit_duplicate_resets_to_idle() {
        let roster = vec![enrolled("9", "Other", &[0.6, 0.8])];
        let mut s = session();
        s.start("1", false).unwrap();
        fill(&mut s, &[0.6, 0.8]);

        let outcome = s.commit(&matcher(), &gate(), &roster).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::DuplicateOfOther {
                identity_id: "9".into(),
                identity_name: "Other".into(),
            }
        );
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.samples_held(), 0);
    }

    #[test]
    fn test_commit_already_enrolled_without_override() {
        let roster = vec![enrolled("1", "Self", &[0.6, 0.8])];
        let mut s = session();
        s.start("1", false).unwrap();
        fill(&mut s, &[0.6, 0.8]);

        let outcome = s.commit(&matcher(), &gate(), &roster).unwrap();
        assert_eq!(outcome, CommitOutcome::AlreadyEnrolled);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_commit_already_enrolled_with_override_commits() {
        let roster = vec![enrolled("1", "Self", &[0.6, 0.8])];
        let mut s = session();
        s.start("1", true).unwrap();
        fill(&mut s, &[0.6, 0.8]);

        let outcome = s.commit(&matcher(), &gate(), &roster).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
        assert_eq!(s.state(), SessionState::Done);
    }

    #[test]
    fn test_commit_in_wrong_state_rejected() {
        let mut s = session();
        assert_eq!(
            s.commit(&matcher(), &gate(), &[]),
            Err(SessionError::NotCommitting)
        );
    }

    #[test]
    fn test_commit_length_mismatch_resets_to_idle() {
        let roster = vec![enrolled("9", "Other", &[0.6, 0.8, 0.0])];
        let mut s = session();
        s.start("1", false).unwrap();
        fill(&mut s, &[0.6, 0.8]);

        assert!(s.commit(&matcher(), &gate(), &roster).is_err());
        assert_eq!(s.state(), SessionState::Idle);
    }
}
