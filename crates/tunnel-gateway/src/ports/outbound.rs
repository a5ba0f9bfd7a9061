//! Outbound (driven) ports of the gateway.
//!
//! The overlay client, the clearnet executor and the clock are external to the
//! pipeline; everything in `service/` talks to them through these traits.

use crate::domain::config::OverlayConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tunnel_types::{KeyPair, Request, Response};

/// Overlay errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    /// Write-once key already holds data
    #[error("key collision: {0}")]
    Collision(String),
    #[error("put failed: {0}")]
    PutFailed(String),
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

/// Asynchronous key/value publish-retrieve service.
///
/// No ordering or latency guarantee; callers bound each call with
/// `tokio::time::timeout`.
#[async_trait]
pub trait OverlayClient: Send + Sync {
    /// Generate the bridge's signing key pair
    async fn generate_key_pair(&self) -> Result<KeyPair, OverlayError>;

    /// Publish `data` at `uri`; `Ok` means the overlay confirmed the write
    async fn put(&self, uri: &str, data: Vec<u8>) -> Result<(), OverlayError>;

    /// Fetch the data at `uri`; `Ok(None)` when nothing was published there
    async fn fetch(&self, uri: &str) -> Result<Option<Vec<u8>>, OverlayError>;

    /// Receive loop; runs for the lifetime of the connection
    async fn listen(&self) -> Result<(), OverlayError>;
}

/// Establishes overlay connections
#[async_trait]
pub trait OverlayConnector: Send + Sync {
    async fn connect(&self, config: &OverlayConfig)
        -> Result<Arc<dyn OverlayClient>, OverlayError>;
}

/// Runs one request against the open Internet.
///
/// Infallible by contract: failures are encoded in the returned `Response`.
#[async_trait]
pub trait ClearnetExecutor: Send + Sync {
    async fn execute(&self, request: Request) -> Response;
}

/// Monotonic time source for testability
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
