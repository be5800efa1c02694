use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use mien_core::{
    CommitOutcome, Embedder, EnrollmentGate, EnrollmentSession, Identity, IdentityMatcher,
    JsonEmbedder, MatchMode, MatchResult, Offer, SessionConfig, SessionState,
};
use mien_store::RosterStore;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] mien_store::StoreError),
    #[error("matching error: {0}")]
    Match(#[from] mien_core::MatchError),
    #[error("session error: {0}")]
    Session(#[from] mien_core::SessionError),
    #[error("probe rejected: {0}")]
    Extraction(#[from] mien_core::ExtractionError),
    #[error("no identity matches '{0}'")]
    UnknownTarget(String),
    #[error("'{0}' is already enrolled; pass force to overwrite")]
    AlreadyEnrolled(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Reply to a successful `StartEnrollment`.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentStarted {
    pub identity_id: String,
    pub identity_name: String,
    pub samples_required: usize,
}

/// Outcome of offering one capture payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SampleOutcome {
    /// Extraction failed; the frame was dropped, capture continues.
    Dropped { reason: String },
    /// Not counted: spacing interval not elapsed, or no active session.
    Ignored { reason: String },
    /// Sample accepted; more are needed.
    Captured { count: usize, required: usize },
    /// Final sample accepted and the enrollment persisted.
    Committed { identity_id: String },
    /// Face already enrolled under a different identity; nothing persisted.
    DuplicateOfOther {
        identity_id: String,
        identity_name: String,
    },
    /// Face already enrolled under the target itself; nothing persisted.
    AlreadyEnrolled,
}

/// Roster listing entry. Embeddings never leave the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    pub name: String,
    pub enrolled: bool,
    pub present: Option<bool>,
    pub enrolled_at: Option<String>,
}

impl From<Identity> for IdentitySummary {
    fn from(identity: Identity) -> Self {
        Self {
            enrolled: identity.is_enrolled(),
            id: identity.id,
            name: identity.name,
            present: identity.present,
            enrolled_at: identity.enrolled_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub embedding_dim: usize,
    pub identities: usize,
    pub enrolled: usize,
    pub session: String,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    StartEnrollment {
        query: String,
        force: bool,
        reply: oneshot::Sender<Result<EnrollmentStarted, EngineError>>,
    },
    OfferSample {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<SampleOutcome, EngineError>>,
    },
    CancelEnrollment {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Recognize {
        payload: Vec<u8>,
        mode: MatchMode,
        mark_present: bool,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
    AddIdentity {
        id: Option<String>,
        name: String,
        reply: oneshot::Sender<Result<IdentitySummary, EngineError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<IdentitySummary>, EngineError>>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SetPresent {
        id: String,
        present: bool,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<StatusReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn start_enrollment(
        &self,
        query: String,
        force: bool,
    ) -> Result<EnrollmentStarted, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::StartEnrollment {
            query,
            force,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn offer_sample(&self, payload: Vec<u8>) -> Result<SampleOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::OfferSample {
            payload,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn cancel_enrollment(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::CancelEnrollment { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn recognize(
        &self,
        payload: Vec<u8>,
        mode: MatchMode,
        mark_present: bool,
    ) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Recognize {
            payload,
            mode,
            mark_present,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn add_identity(
        &self,
        id: Option<String>,
        name: String,
    ) -> Result<IdentitySummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::AddIdentity {
            id,
            name,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn list(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::List { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn remove(&self, id: String) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Remove {
            id,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn set_present(&self, id: String, present: bool) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::SetPresent {
            id,
            present,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the store, the enrollment session, the matcher and the
/// gate; requests are serviced strictly in arrival order. That single-writer
/// discipline makes `offer` atomic and runs "scan + decide + persist" as one
/// uninterrupted step, so two near-simultaneous enrollments can never both
/// pass the duplicate check against a stale roster.
pub fn spawn_engine(config: &Config, store: RosterStore) -> EngineHandle {
    let mut engine = Engine {
        store,
        session: EnrollmentSession::new(SessionConfig {
            samples_required: config.samples_per_enroll,
            min_capture_interval: config.min_capture_interval,
        }),
        matcher: IdentityMatcher::new(config.matcher.clone()),
        gate: EnrollmentGate::new(config.gate.clone()),
        embedder: JsonEmbedder::new(config.embedding_dim),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::StartEnrollment {
                        query,
                        force,
                        reply,
                    } => {
                        let _ = reply.send(engine.start_enrollment(&query, force));
                    }
                    EngineRequest::OfferSample { payload, reply } => {
                        let _ = reply.send(engine.offer_sample(&payload));
                    }
                    EngineRequest::CancelEnrollment { reply } => {
                        let _ = reply.send(engine.cancel_enrollment());
                    }
                    EngineRequest::Recognize {
                        payload,
                        mode,
                        mark_present,
                        reply,
                    } => {
                        let _ = reply.send(engine.recognize(&payload, mode, mark_present));
                    }
                    EngineRequest::AddIdentity { id, name, reply } => {
                        let _ = reply.send(engine.add_identity(id, &name));
                    }
                    EngineRequest::List { reply } => {
                        let _ = reply.send(engine.list());
                    }
                    EngineRequest::Remove { id, reply } => {
                        let _ = reply.send(engine.remove(&id));
                    }
                    EngineRequest::SetPresent { id, present, reply } => {
                        let _ = reply.send(engine.set_present(&id, present));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

struct Engine {
    store: RosterStore,
    session: EnrollmentSession,
    matcher: IdentityMatcher,
    gate: EnrollmentGate,
    embedder: JsonEmbedder,
}

impl Engine {
    fn start_enrollment(
        &mut self,
        query: &str,
        force: bool,
    ) -> Result<EnrollmentStarted, EngineError> {
        let target = self
            .store
            .find(query)?
            .ok_or_else(|| EngineError::UnknownTarget(query.to_string()))?;

        if target.is_enrolled() && !force {
            return Err(EngineError::AlreadyEnrolled(target.name));
        }

        self.session.start(target.id.clone(), force)?;
        tracing::info!(
            identity_id = %target.id,
            identity_name = %target.name,
            force,
            "enrollment started"
        );
        Ok(EnrollmentStarted {
            identity_id: target.id,
            identity_name: target.name,
            samples_required: self.session.samples_required(),
        })
    }

    fn offer_sample(&mut self, payload: &[u8]) -> Result<SampleOutcome, EngineError> {
        let embedding = match self.embedder.embed(payload) {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(error = %err, "sample dropped: extraction failed");
                return Ok(SampleOutcome::Dropped {
                    reason: err.to_string(),
                });
            }
        };

        match self.session.offer(embedding, Instant::now()) {
            Offer::NotCapturing => Ok(SampleOutcome::Ignored {
                reason: "no active enrollment session".into(),
            }),
            Offer::TooSoon => Ok(SampleOutcome::Ignored {
                reason: "capture interval not elapsed".into(),
            }),
            Offer::Captured { count, required } => {
                tracing::debug!(count, required, "sample captured");
                Ok(SampleOutcome::Captured { count, required })
            }
            Offer::ReadyToCommit => self.commit(),
        }
    }

    /// Commit is all-or-nothing: average + gate + row update succeed
    /// together or the session is dropped with nothing written.
    fn commit(&mut self) -> Result<SampleOutcome, EngineError> {
        let roster = match self.store.all() {
            Ok(roster) => roster,
            Err(err) => {
                self.session.cancel();
                return Err(err.into());
            }
        };

        match self.session.commit(&self.matcher, &self.gate, &roster)? {
            CommitOutcome::Committed {
                identity_id,
                representative,
            } => {
                if let Err(err) =
                    self.store
                        .persist_enrollment(&identity_id, &representative, None)
                {
                    self.session.cancel();
                    return Err(err.into());
                }
                self.session.cancel();
                tracing::info!(identity_id = %identity_id, "enrollment committed");
                Ok(SampleOutcome::Committed { identity_id })
            }
            CommitOutcome::DuplicateOfOther {
                identity_id,
                identity_name,
            } => {
                tracing::warn!(
                    identity_id = %identity_id,
                    identity_name = %identity_name,
                    "enrollment rejected: duplicate of another identity"
                );
                Ok(SampleOutcome::DuplicateOfOther {
                    identity_id,
                    identity_name,
                })
            }
            CommitOutcome::AlreadyEnrolled => {
                tracing::info!("enrollment rejected: target already enrolled");
                Ok(SampleOutcome::AlreadyEnrolled)
            }
        }
    }

    fn cancel_enrollment(&mut self) -> Result<bool, EngineError> {
        let was_active = self.session.state() != SessionState::Idle;
        self.session.cancel();
        if was_active {
            tracing::info!("enrollment cancelled");
        }
        Ok(was_active)
    }

    fn recognize(
        &mut self,
        payload: &[u8],
        mode: MatchMode,
        mark_present: bool,
    ) -> Result<MatchResult, EngineError> {
        let probe = self.embedder.embed(payload)?;
        let roster = self.store.all()?;
        let result = self.matcher.find_best(&probe, &roster, mode)?;

        if result.accepted && mark_present {
            if let Some(id) = &result.identity_id {
                self.store.set_present(id, true)?;
            }
        }

        tracing::info!(
            accepted = result.accepted,
            similarity = result.similarity,
            distance = result.distance,
            scanned = result.scanned,
            "recognition pass"
        );
        Ok(result)
    }

    fn add_identity(
        &mut self,
        id: Option<String>,
        name: &str,
    ) -> Result<IdentitySummary, EngineError> {
        Ok(self.store.add(id, name)?.into())
    }

    fn list(&mut self) -> Result<Vec<IdentitySummary>, EngineError> {
        Ok(self
            .store
            .all()?
            .into_iter()
            .map(IdentitySummary::from)
            .collect())
    }

    fn remove(&mut self, id: &str) -> Result<(), EngineError> {
        self.store.remove(id)?;
        tracing::info!(id, "identity removed");
        Ok(())
    }

    fn set_present(&mut self, id: &str, present: bool) -> Result<(), EngineError> {
        Ok(self.store.set_present(id, present)?)
    }

    fn status(&mut self) -> Result<StatusReport, EngineError> {
        let roster = self.store.all()?;
        Ok(StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            embedding_dim: self.embedder.dim(),
            identities: roster.len(),
            enrolled: roster.iter().filter(|p| p.is_enrolled()).count(),
            session: format!("{:?}", self.session.state()).to_lowercase(),
        })
    }
}
