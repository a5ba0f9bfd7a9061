//! Clearnet gateway - executes HTTP requests submitted over an overlay network
//! and publishes the responses back to it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          CLEARNET GATEWAY                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  admit   ┌──────────────────┐                   │
//! │  │ RequestIngestor │ ───────→ │ AccessController │                   │
//! │  │   every 5s      │          │ rate→block→allow │                   │
//! │  └───────┬─────────┘          └──────────────────┘                   │
//! │          │ spawn (≤64)                                               │
//! │  ┌───────┴──────────┐         ┌──────────────────┐                   │
//! │  │ ClearnetExecutor │ ──────→ │    StateStore    │ ←── StatsReporter │
//! │  │     reqwest      │ respond │  sharded by id   │       every 30s   │
//! │  └──────────────────┘         └────────┬─────────┘                   │
//! │                                        │ snapshot                    │
//! │                               ┌────────┴──────────┐                  │
//! │                               │ ResponsePublisher │                  │
//! │                               │     every 2s      │                  │
//! │                               └────────┬──────────┘                  │
//! └────────────────────────────────────────┼─────────────────────────────┘
//!              ↑ KSK@<queue>/request-<n>   ↓ <private>/response-<id>
//!                             OVERLAY NETWORK
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tunnel_gateway::{LoopbackConnector, TunnelConfig, TunnelService};
//!
//! let mut service = TunnelService::bootstrap(TunnelConfig::default(), &LoopbackConnector::default()).await?;
//! service.start();
//! // ...
//! service.shutdown().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod admin;
pub mod domain;
pub mod ports;
pub mod service;

/// Version stamped on outbound requests and reported by the admin API
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports
pub use adapters::{LoopbackConnector, MemoryOverlay, ReqwestExecutor, BRIDGE_HEADER};
pub use admin::{build_admin_router, AdminState};
pub use domain::{
    AccessController, ConfigError, Decision, GatewayError, RequestError, Stage, StateStore,
    StoreCounts, StoredEntry, TunnelConfig,
};
pub use ports::{
    ClearnetExecutor, Clock, ManualClock, OverlayClient, OverlayConnector, OverlayError,
    SystemClock,
};
pub use service::{
    IngestReport, PublishReport, RequestIngestor, ResponsePublisher, StatsReporter,
    StatsSnapshot, TunnelService,
};
