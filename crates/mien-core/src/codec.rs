//! JSON wire form for embeddings and the external extractor seam.
//!
//! An embedding travels and persists as a bare JSON array of decimal
//! numbers in index order. Decoding validates the expected dimension — a
//! differing length is a format error, never silently padded or truncated.

use crate::embedding::Embedding;
use crate::error::{CodecError, ExtractionError};

/// Encode an embedding as a JSON array string.
pub fn encode(embedding: &Embedding) -> Result<String, CodecError> {
    Ok(serde_json::to_string(embedding)?)
}

/// Decode a JSON array string, validating the expected dimension.
pub fn decode(payload: &str, expected_len: usize) -> Result<Embedding, CodecError> {
    let embedding: Embedding = serde_json::from_str(payload)?;
    if embedding.len() != expected_len {
        return Err(CodecError::WrongLength {
            expected: expected_len,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

/// Contract for the external feature extractor.
///
/// The neural model that turns a face image into a vector lives outside
/// this system; implementations produce a fixed-length embedding or a
/// distinct extraction error. A failed extraction drops that frame —
/// capture continues.
pub trait Embedder {
    fn embed(&mut self, input: &[u8]) -> Result<Embedding, ExtractionError>;
}

/// Extractor for transports where the feature vector was already computed
/// upstream: the input bytes are the JSON wire form of the embedding.
pub struct JsonEmbedder {
    dim: usize,
}

impl JsonEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Embedder for JsonEmbedder {
    fn embed(&mut self, input: &[u8]) -> Result<Embedding, ExtractionError> {
        let text = std::str::from_utf8(input).map_err(CodecError::from)?;
        Ok(decode(text, self.dim)?)
    }
}
