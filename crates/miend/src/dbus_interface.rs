use zbus::interface;

use mien_core::MatchMode;

use crate::engine::{EngineError, EngineHandle};

/// D-Bus interface for the Mien identity daemon.
///
/// Bus name: org.freedesktop.Mien1
/// Object path: /org/freedesktop/Mien1
///
/// Structured replies are JSON documents. Probe and sample payloads are the
/// JSON wire form of an embedding — the daemon never sees images, and
/// stored embeddings never leave it.
pub struct MienService {
    engine: EngineHandle,
}

impl MienService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn failed(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|err| zbus::fdo::Error::Failed(err.to_string()))
}

#[interface(name = "org.freedesktop.Mien1")]
impl MienService {
    /// Begin a capture session for the identity matching `query`.
    /// `force` enables the explicit re-enrollment override.
    async fn start_enrollment(&self, query: &str, force: bool) -> zbus::fdo::Result<String> {
        let started = self
            .engine
            .start_enrollment(query.to_string(), force)
            .await
            .map_err(failed)?;
        to_json(&started)
    }

    /// Offer one captured sample payload to the active session.
    /// Gate rejections come back inside the reply, not as errors.
    async fn offer_sample(&self, payload: &str) -> zbus::fdo::Result<String> {
        let outcome = self
            .engine
            .offer_sample(payload.as_bytes().to_vec())
            .await
            .map_err(failed)?;
        to_json(&outcome)
    }

    /// Abandon the active session. Returns whether one was active.
    async fn cancel_enrollment(&self) -> zbus::fdo::Result<bool> {
        self.engine.cancel_enrollment().await.map_err(failed)
    }

    /// Match a probe payload against the roster.
    async fn recognize(
        &self,
        payload: &str,
        by_similarity: bool,
        mark_present: bool,
    ) -> zbus::fdo::Result<String> {
        let mode = if by_similarity {
            MatchMode::Similarity
        } else {
            MatchMode::Distance
        };
        let result = self
            .engine
            .recognize(payload.as_bytes().to_vec(), mode, mark_present)
            .await
            .map_err(failed)?;
        to_json(&result)
    }

    /// Create an un-enrolled identity. Empty `id` assigns a fresh UUID.
    async fn add_identity(&self, id: &str, name: &str) -> zbus::fdo::Result<String> {
        let id = (!id.is_empty()).then(|| id.to_string());
        let identity = self
            .engine
            .add_identity(id, name.to_string())
            .await
            .map_err(failed)?;
        to_json(&identity)
    }

    /// List the roster (summaries only).
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let listing = self.engine.list().await.map_err(failed)?;
        to_json(&listing)
    }

    /// Remove an identity and its enrollment.
    async fn remove_identity(&self, id: &str) -> zbus::fdo::Result<bool> {
        self.engine.remove(id.to_string()).await.map_err(failed)?;
        Ok(true)
    }

    /// Set or clear an identity's presence flag.
    async fn set_present(&self, id: &str, present: bool) -> zbus::fdo::Result<bool> {
        self.engine
            .set_present(id.to_string(), present)
            .await
            .map_err(failed)?;
        Ok(true)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(failed)?;
        to_json(&report)
    }
}
