//! Gateway error types.
//!
//! Per-request failures never propagate as control flow: a `RequestError` is
//! turned into a `Response` carrying its status code. Only `GatewayError`
//! (bootstrap) is allowed to stop the process.

use thiserror::Error;
use tunnel_types::Response;

/// Status codes carried in error responses
pub mod codes {
    pub const INVALID_REQUEST: u16 = 400;
    pub const ACCESS_DENIED: u16 = 403;
    pub const RATE_LIMITED: u16 = 429;
    pub const UPSTREAM_FAILURE: u16 = 502;
}

/// Failure of a single tunnelled request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Sliding-window check failed
    #[error("rate limit exceeded for client {identity}")]
    RateLimited { identity: String },

    /// Block-list hit, or allow-list configured and missed
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Malformed method, URL or header
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failure or body read failure against the origin
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
}

impl RequestError {
    /// HTTP status carried by the error response
    pub fn status_code(&self) -> u16 {
        match self {
            RequestError::RateLimited { .. } => codes::RATE_LIMITED,
            RequestError::AccessDenied(_) => codes::ACCESS_DENIED,
            RequestError::InvalidRequest(_) => codes::INVALID_REQUEST,
            RequestError::UpstreamFailure(_) => codes::UPSTREAM_FAILURE,
        }
    }

    /// Status line text, e.g. `429 Too Many Requests`
    pub fn status_text(&self) -> String {
        status_line(self.status_code())
    }

    /// Turn the error into the response published for `id`
    pub fn into_response(self, id: impl Into<String>) -> Response {
        let status_code = self.status_code();
        Response::failure(id, status_code, status_line(status_code), self.to_string())
    }
}

/// `"<code> <canonical reason>"`, or just the code when it has no reason phrase
pub fn status_line(code: u16) -> String {
    match reqwest::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{} {}", code, reason),
        None => code.to_string(),
    }
}

/// Fatal bootstrap errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration rejected by validation
    #[error("configuration error: {0}")]
    Config(String),

    /// Overlay connection could not be established
    #[error("overlay connect failed: {0}")]
    ConnectFailure(String),

    /// Overlay could not generate the server key pair
    #[error("key pair generation failed: {0}")]
    KeyGeneration(String),

    /// HTTP client construction failed
    #[error("http client error: {0}")]
    HttpClient(String),

    /// Admin socket bind error
    #[error("admin bind error: {0}")]
    Bind(String),
}

/// State store rejections
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// ID is in flight, awaiting publish, or recently retired
    #[error("duplicate request id: {0}")]
    Duplicate(String),
}
