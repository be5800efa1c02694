use thiserror::Error;

/// Errors from vector comparison and aggregation.
///
/// A `LengthMismatch` is fatal to that comparison — callers must never
/// proceed with a fabricated score.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("cannot average an empty set of capture samples")]
    EmptyCapture,
}

/// Errors decoding the JSON wire form of an embedding.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("embedding payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("embedding payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("embedding payload has wrong length: expected {expected} values, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Failure of the external feature extractor.
///
/// Recoverable: the triggering frame is dropped and capture continues.
/// Never substituted with a zero vector.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("embedding payload rejected: {0}")]
    InvalidPayload(#[from] CodecError),
    #[error("extractor backend failed: {0}")]
    Backend(String),
}
