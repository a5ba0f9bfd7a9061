//! Access control: per-client sliding-window rate limiting plus coarse
//! URL allow/block filtering.
//!
//! Evaluation order is rate → block → allow, so a block-list hit wins over any
//! allow-list match. Matching is plain substring containment on the full URL;
//! `example.com` also matches `notexample.com.evil/`.

use crate::domain::config::{AccessConfig, RateLimitConfig};
use crate::domain::error::RequestError;
use crate::ports::Clock;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use tunnel_types::client_identity;

/// Admission verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(RequestError),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Status code of a denial
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Decision::Allow => None,
            Decision::Deny(e) => Some(e.status_code()),
        }
    }
}

/// Admission timestamps of one client inside the current window
#[derive(Debug, Default)]
struct RateWindow {
    stamps: VecDeque<Instant>,
}

impl RateWindow {
    /// Drop timestamps whose age reached `window`
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_admit(&mut self, now: Instant, limit: u32, window: Duration) -> bool {
        self.prune(now, window);
        if self.stamps.len() >= limit as usize {
            return false;
        }
        self.stamps.push_back(now);
        true
    }
}

/// Policy gate consulted once per discovered request
pub struct AccessController {
    windows: DashMap<String, RateWindow>,
    rate: RateLimitConfig,
    access: AccessConfig,
    clock: Arc<dyn Clock>,
}

impl AccessController {
    pub fn new(rate: RateLimitConfig, access: AccessConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            rate,
            access,
            clock,
        }
    }

    /// Decide whether `request_id` may fetch `url`
    pub fn admit(&self, request_id: &str, url: &str) -> Decision {
        let identity = client_identity(request_id);

        if let Err(e) = self.check_rate(identity) {
            debug!(request_id, identity, "Rate limit exceeded");
            return Decision::Deny(e);
        }

        if let Some(blocked) = self.access.block.iter().find(|b| url.contains(b.as_str())) {
            debug!(request_id, url, blocked = %blocked, "URL matched block list");
            return Decision::Deny(RequestError::AccessDenied(format!(
                "url matches blocked pattern {:?}",
                blocked
            )));
        }

        if !self.access.allow.is_empty()
            && !self.access.allow.iter().any(|a| url.contains(a.as_str()))
        {
            debug!(request_id, url, "URL not on allow list");
            return Decision::Deny(RequestError::AccessDenied(
                "url does not match any allowed pattern".into(),
            ));
        }

        Decision::Allow
    }

    fn check_rate(&self, identity: &str) -> Result<(), RequestError> {
        if !self.rate.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let mut window = self.windows.entry(identity.to_string()).or_default();
        if window.try_admit(now, self.rate.limit, self.rate.window) {
            Ok(())
        } else {
            Err(RequestError::RateLimited {
                identity: identity.to_string(),
            })
        }
    }

    /// Forget clients whose window has fully aged out.
    ///
    /// Returns the number of windows removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let window = self.rate.window;
        let before = self.windows.len();
        self.windows.retain(|_, w| {
            w.prune(now, window);
            !w.stamps.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Evicted idle rate windows");
        }
        removed
    }

    /// Number of tracked client identities
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}
