//! Domain types for the gateway.
//!
//! Configuration, error types, access policy and the state store. Nothing in
//! here performs I/O.

pub mod access;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod store;

// Re-exports for convenience
pub use access::{AccessController, Decision};
pub use config::{
    AccessConfig, AdminConfig, ClearnetConfig, ConfigError, IngestConfig, OverlayConfig,
    PublishConfig, RateLimitConfig, ServerConfig, StatsConfig, StoreConfig, TunnelConfig,
};
pub use error::{codes, status_line, GatewayError, RequestError, StoreError};
pub use lifecycle::{InvalidTransition, Stage};
pub use store::{StateStore, StoreCounts, StoredEntry, StoreStats};
