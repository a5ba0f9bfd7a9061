//! Adapters for the gateway.
//!
//! Infrastructure implementations of the outbound ports: the clearnet HTTP
//! client and the in-process overlay.

pub mod clearnet;
pub mod loopback;

pub use clearnet::{ReqwestExecutor, BRIDGE_HEADER};
pub use loopback::{LoopbackConnector, MemoryOverlay, LOOPBACK_ENDPOINT};
