//! # Clearnet Bridge Test Suite
//!
//! Workspace-level tests that drive several components together.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # Local HTTP origin, bridge fixture, polling helpers
//! └── integration/
//!     ├── pipeline.rs   # Client → overlay → bridge → clearnet → overlay → client
//!     ├── concurrency.rs# Many IDs / racing duplicates
//!     └── clearnet.rs   # reqwest executor against a local origin
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p tunnel-tests
//!
//! # By category
//! cargo test -p tunnel-tests integration::pipeline::
//! cargo test -p tunnel-tests integration::clearnet::
//! ```

pub mod integration;

#[cfg(test)]
pub mod support;
