//! Ports (hexagonal architecture boundaries).

pub mod outbound;

pub use outbound::{
    ClearnetExecutor, Clock, ManualClock, OverlayClient, OverlayConnector, OverlayError,
    SystemClock,
};
