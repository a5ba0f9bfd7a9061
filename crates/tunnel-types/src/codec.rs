//! # Canonical Encoding
//!
//! Records travel as compact JSON objects. Byte fields are standard base64,
//! absent optionals are omitted and header maps are key-ordered, so encoding
//! is deterministic.

use crate::entities::{Request, Response};
use crate::errors::CodecError;

/// Encode a request for submission to the overlay.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(request).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a request fetched from a queue slot.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a response for publication.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(response).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a published response.
pub fn decode_response(bytes: &[u8]) -> Result<Response, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
