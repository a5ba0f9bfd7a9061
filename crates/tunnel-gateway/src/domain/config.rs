//! Gateway configuration with validation.
//!
//! Every section defaults to the reference deployment values, so an empty
//! document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main tunnel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Server identity
    pub server: ServerConfig,
    /// Overlay connection
    pub overlay: OverlayConfig,
    /// Per-client sliding window
    pub rate_limit: RateLimitConfig,
    /// URL allow/block lists
    pub access: AccessConfig,
    /// Outbound HTTP execution
    pub clearnet: ClearnetConfig,
    /// Request discovery loop
    pub ingest: IngestConfig,
    /// Response publication loop
    pub publish: PublishConfig,
    /// State store retention
    pub store: StoreConfig,
    /// Backlog reporting loop
    pub stats: StatsConfig,
    /// Read-only admin API
    pub admin: AdminConfig,
}

impl TunnelConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.limit == 0 {
            return Err(ConfigError::InvalidRateLimit("limit cannot be 0".into()));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::InvalidRateLimit("window cannot be 0".into()));
        }

        if self.clearnet.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "clearnet timeout cannot be 0".into(),
            ));
        }
        if self.clearnet.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_body_bytes cannot be 0".into(),
            ));
        }

        if self.ingest.interval.is_zero()
            || self.publish.interval.is_zero()
            || self.stats.interval.is_zero()
        {
            return Err(ConfigError::InvalidInterval(
                "loop intervals cannot be 0".into(),
            ));
        }
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::InvalidLimit("batch_size cannot be 0".into()));
        }
        if self.ingest.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_concurrent_fetches cannot be 0".into(),
            ));
        }
        if self.ingest.fetch_timeout.is_zero() || self.publish.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "overlay timeouts cannot be 0".into(),
            ));
        }

        if self.publish.max_attempts == Some(0) {
            return Err(ConfigError::InvalidRetry("max_attempts cannot be 0".into()));
        }
        if self.publish.backoff_max < self.publish.backoff_base {
            return Err(ConfigError::InvalidRetry(
                "backoff_max must be >= backoff_base".into(),
            ));
        }

        Ok(())
    }

    /// Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

/// Server identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported by the admin API
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "clearnet-bridge".to_string(),
        }
    }
}

/// Overlay connection settings handed to the connector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Node endpoint (`loopback` selects the in-process overlay)
    pub endpoint: String,
    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            endpoint: "loopback".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Sliding-window rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Admissions per window per client identity
    pub limit: u32,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// URL substring filters. An empty allow-list allows everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub allow: Vec<String>,
    pub block: Vec<String>,
}

/// Outbound HTTP execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearnetConfig {
    /// Wall-clock bound on a whole call, redirects and body included
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Redirects followed before the last response is returned as-is
    pub max_redirects: usize,
    /// Largest origin body kept in memory
    pub max_body_bytes: usize,
}

impl Default for ClearnetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            max_body_bytes: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

/// Request discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Poll cadence
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Max queue slots read per tick
    pub batch_size: usize,
    /// Timeout of a single slot fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Bound on concurrent outbound fetches
    pub max_concurrent_fetches: usize,
    /// Queue name override (default: derived from the public key)
    pub queue_name: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 32,
            fetch_timeout: Duration::from_secs(30),
            max_concurrent_fetches: 64,
            queue_name: None,
        }
    }
}

/// Response publication and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Publish cadence
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Timeout of one publish attempt
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Abandon a response after this many failures (None = retry forever)
    pub max_attempts: Option<u32>,
    /// First retry delay for one response (0 = retry every cycle)
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Cap of the exponential retry delay
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(5 * 60),
            max_attempts: None,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }
}

impl PublishConfig {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        if self.backoff_base.is_zero() || failures == 0 {
            return Duration::ZERO;
        }
        let exp = failures.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

/// State store retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a published ID keeps being deduplicated
    #[serde(with = "humantime_serde")]
    pub retired_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retired_retention: Duration::from_secs(60 * 60),
        }
    }
}

/// Backlog reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Admin server configuration (localhost only by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin server
    pub enabled: bool,
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8088)
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8088,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid loop cadence
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    /// Invalid publish retry policy
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
}

/// Duration (de)serialization as `"30s"`, `"500ms"`, `"5m"`, `"1h"`
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            let m = mins.trim().parse::<u64>().map_err(|_| "invalid minutes")?;
            m.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("duration out of range")
        } else if let Some(hours) = s.strip_suffix('h') {
            let h = hours.trim().parse::<u64>().map_err(|_| "invalid hours")?;
            h.checked_mul(3600)
                .map(Duration::from_secs)
                .ok_or("duration out of range")
        } else {
            // Plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
