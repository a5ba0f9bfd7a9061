//! # Rendezvous Keys
//!
//! Clients and the bridge never talk directly; they agree on overlay keys.
//!
//! | Key | Writer | Reader |
//! |-----|--------|--------|
//! | `KSK@<queue>/request-<n>` | any client (write-once slot) | bridge |
//! | `<private>/response-<id>` | bridge | client holding `<public>` |
//!
//! The queue name is derived from the bridge's public key, so a client needs
//! nothing but that key to submit and to collect its answer.

use crate::errors::IdError;
use sha2::{Digest, Sha256};

/// Maximum request ID length.
pub const MAX_ID_LEN: usize = 128;

/// Separator between the claimed client identity and the rest of the ID.
pub const IDENTITY_SEPARATOR: char = ':';

/// Check that an ID can be embedded in a response key.
pub fn validate_request_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    let len = id.chars().count();
    if len > MAX_ID_LEN {
        return Err(IdError::TooLong {
            len,
            max: MAX_ID_LEN,
        });
    }
    match id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
    {
        Some(c) => Err(IdError::InvalidChar(c)),
        None => Ok(()),
    }
}

/// Claimed source identity of a request: the ID prefix before the first `:`.
///
/// `alice:42` belongs to `alice`; an ID without a separator is its own identity.
pub fn client_identity(id: &str) -> &str {
    id.split_once(IDENTITY_SEPARATOR)
        .map(|(identity, _)| identity)
        .unwrap_or(id)
}

/// Overlay key under which the response for `id` is published.
pub fn response_uri(private_key: &str, id: &str) -> String {
    format!("{}/response-{}", private_key, id)
}

/// Public append-only request queue of one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestQueue {
    name: String,
}

impl RequestQueue {
    /// Queue with an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Queue derived from the bridge's public key.
    pub fn for_public_key(public_key: &str) -> Self {
        let digest = Sha256::digest(public_key.as_bytes());
        let fingerprint = hex::encode(&digest[..8]);
        Self {
            name: format!("tunnel-{}", fingerprint),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of slot `n`.
    pub fn slot_uri(&self, n: u64) -> String {
        format!("KSK@{}/request-{}", self.name, n)
    }
}
