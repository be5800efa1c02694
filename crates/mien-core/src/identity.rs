use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

/// An enrolled (or enrollable) person.
///
/// The store owns the canonical copy; matching components operate on
/// snapshots passed by value. `embedding: None` means not yet enrolled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub embedding: Option<Embedding>,
    pub photo_ref: Option<String>,
    pub present: Option<bool>,
    /// RFC 3339 timestamp of the last committed enrollment.
    pub enrolled_at: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            embedding: None,
            photo_ref: None,
            present: None,
            enrolled_at: None,
        }
    }

    pub fn is_enrolled(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Result of matching a probe embedding against the roster.
///
/// Identity fields are populated only when the threshold policy accepted
/// the best match; the scores of the best candidate are preserved either
/// way. `scanned == 0` distinguishes "nobody enrolled" from a genuine
/// low-confidence scan.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub accepted: bool,
    pub similarity: f32,
    pub distance: f32,
    pub identity_id: Option<String>,
    pub identity_name: Option<String>,
    pub scanned: usize,
}
