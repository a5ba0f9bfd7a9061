//! Response publication.
//!
//! Each tick snapshots the pending responses and publishes every one at its
//! response key. A confirmed publish retires the entry; a failed one stays
//! for the next tick. No store lock is held across an overlay call.
//!
//! Shutdown interrupts a running tick. An interrupted put leaves its entry
//! pending, and the write-once key makes a later retry safe.

use crate::domain::config::PublishConfig;
use crate::domain::lifecycle::Stage;
use crate::domain::store::StateStore;
use crate::ports::{Clock, OverlayClient, OverlayError};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Span};
use tunnel_types::{encode_response, response_uri, Response};

/// Outcome of one publish tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
    /// Skipped because their retry delay has not elapsed
    pub deferred: usize,
    pub abandoned: usize,
}

/// Failure bookkeeping for one response
#[derive(Debug, Clone, Copy)]
struct Attempts {
    failures: u32,
    retry_at: Instant,
}

pub struct ResponsePublisher {
    overlay: Arc<dyn OverlayClient>,
    private_key: String,
    store: Arc<StateStore>,
    attempts: DashMap<String, Attempts>,
    config: PublishConfig,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl ResponsePublisher {
    pub fn new(
        overlay: Arc<dyn OverlayClient>,
        private_key: impl Into<String>,
        store: Arc<StateStore>,
        config: PublishConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            overlay,
            private_key: private_key.into(),
            store,
            attempts: DashMap::new(),
            config,
            clock,
            span: info_span!("publish"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Consecutive failures recorded for `id`
    pub fn failures(&self, id: &str) -> u32 {
        self.attempts.get(id).map(|a| a.failures).unwrap_or(0)
    }

    /// Publish every pending response once
    pub async fn publish_once(&self) -> PublishReport {
        let mut report = PublishReport::default();

        for response in self.store.snapshot() {
            let now = self.clock.now();
            if self
                .attempts
                .get(&response.id)
                .is_some_and(|a| a.retry_at > now)
            {
                report.deferred += 1;
                continue;
            }

            match self.publish(&response).await {
                Ok(()) => {
                    self.attempts.remove(&response.id);
                    if self.store.delete(&response.id) {
                        debug!(parent: &self.span, request_id = %response.id, status_code = response.status_code, "Response published");
                        report.published += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    if self.record_failure(&response.id, &e) {
                        report.abandoned += 1;
                    }
                }
            }
        }

        let purged = self.store.purge_retired();
        if purged > 0 {
            debug!(parent: &self.span, purged, remaining = self.store.retired_count(), "Forgot retired request ids");
        }
        report
    }

    async fn publish(&self, response: &Response) -> Result<(), OverlayError> {
        let bytes =
            encode_response(response).map_err(|e| OverlayError::PutFailed(e.to_string()))?;
        let uri = response_uri(&self.private_key, &response.id);

        match timeout(self.config.attempt_timeout, self.overlay.put(&uri, bytes)).await {
            Ok(Ok(())) => Ok(()),
            // Only the private key can insert here and the key is write-once,
            // so an earlier attempt already landed.
            Ok(Err(OverlayError::Collision(_))) => {
                debug!(parent: &self.span, request_id = %response.id, "Response key already populated");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OverlayError::Timeout(self.config.attempt_timeout)),
        }
    }

    /// Count a failure; returns true if the response was abandoned
    fn record_failure(&self, id: &str, cause: &OverlayError) -> bool {
        self.store.advance(id, Stage::PublishPending);
        let now = self.clock.now();
        let failures = {
            let mut entry = self.attempts.entry(id.to_string()).or_insert(Attempts {
                failures: 0,
                retry_at: now,
            });
            entry.failures += 1;
            entry.retry_at = now + self.config.backoff_after(entry.failures);
            entry.failures
        };

        if self.config.max_attempts.is_some_and(|max| failures >= max) {
            self.attempts.remove(id);
            if self.store.abandon(id) {
                error!(parent: &self.span, request_id = id, attempts = failures, error = %cause, "Abandoning response after repeated publish failures");
                return true;
            }
            return false;
        }

        warn!(parent: &self.span, request_id = id, attempts = failures, error = %cause, "Publish failed, will retry");
        false
    }

    /// Publish loop; exits when `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(parent: &self.span, interval = ?self.config.interval, "Response publisher started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = tokio::select! {
                        report = self.publish_once() => report,
                        _ = shutdown.wait_for(|stop| *stop) => {
                            debug!(parent: &self.span, "Publish cycle interrupted by shutdown");
                            break;
                        }
                    };
                    if report.published + report.failed > 0 {
                        debug!(
                            parent: &self.span,
                            published = report.published,
                            failed = report.failed,
                            deferred = report.deferred,
                            abandoned = report.abandoned,
                            "Publish cycle finished"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(parent: &self.span, "Response publisher stopped");
    }
}
