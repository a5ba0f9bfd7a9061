//! Cross-component integration tests.

pub mod clearnet;
pub mod concurrency;
pub mod pipeline;
