//! # Tunnel Types Crate
//!
//! Records exchanged between overlay clients and the clearnet bridge, plus the
//! conventions both sides use to find each other on the overlay.
//!
//! ## Contents
//!
//! - `entities` - `Request`, `Response` and the server `KeyPair`
//! - `codec` - canonical byte encoding used on the overlay and the admin API
//! - `keys` - request ID rules and rendezvous key derivation
//! - `errors` - codec and identifier errors
//!
//! ## Rendezvous
//!
//! ```text
//!  client                          overlay                          bridge
//!    │  put KSK@<queue>/request-<n>   │                               │
//!    ├──────────────────────────────→ │  fetch KSK@<queue>/request-<n> │
//!    │                                │ ←─────────────────────────────┤
//!    │                                │  put <private>/response-<id>   │
//!    │  fetch <public>/response-<id>  │ ←─────────────────────────────┤
//!    ├──────────────────────────────→ │                               │
//! ```

pub mod codec;
pub mod entities;
pub mod errors;
pub mod keys;

pub use codec::{decode_request, decode_response, encode_request, encode_response};
pub use entities::{KeyPair, Request, Response};
pub use errors::{CodecError, IdError};
pub use keys::{client_identity, response_uri, validate_request_id, RequestQueue};
