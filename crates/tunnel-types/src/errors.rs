//! # Error Types
//!
//! Errors raised while encoding records or validating identifiers.

use thiserror::Error;

/// Errors from the canonical record encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Record could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid record.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            CodecError::Encode(e.to_string())
        } else {
            CodecError::Decode(e.to_string())
        }
    }
}

/// Reasons a request ID cannot be used to address a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// ID is the empty string.
    #[error("request id is empty")]
    Empty,

    /// ID exceeds the maximum length.
    #[error("request id too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    /// ID contains a character outside `[A-Za-z0-9._:-]`.
    #[error("request id contains invalid character {0:?}")]
    InvalidChar(char),
}
