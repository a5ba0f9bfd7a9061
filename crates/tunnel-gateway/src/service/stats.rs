//! Periodic backlog reporting. Read-only with respect to the store.

use crate::domain::access::AccessController;
use crate::domain::store::StateStore;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, info_span, Span};

/// Point-in-time backlog sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub pending_requests: usize,
    pub pending_responses: usize,
    pub rate_windows: usize,
}

pub struct StatsReporter {
    store: Arc<StateStore>,
    access: Arc<AccessController>,
    interval: Duration,
    span: Span,
}

impl StatsReporter {
    pub fn new(store: Arc<StateStore>, access: Arc<AccessController>, interval: Duration) -> Self {
        Self {
            store,
            access,
            interval,
            span: info_span!("stats"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counts = self.store.counts();
        StatsSnapshot {
            pending_requests: counts.pending_requests,
            pending_responses: counts.pending_responses,
            rate_windows: self.access.window_count(),
        }
    }

    /// Log the current backlog
    pub fn report(&self) -> StatsSnapshot {
        let snapshot = self.snapshot();
        let stats = self.store.stats();
        info!(
            parent: &self.span,
            pending_requests = snapshot.pending_requests,
            pending_responses = snapshot.pending_responses,
            rate_windows = snapshot.rate_windows,
            registered = stats.total_registered.load(Ordering::Relaxed),
            published = stats.total_published.load(Ordering::Relaxed),
            abandoned = stats.total_abandoned.load(Ordering::Relaxed),
            oldest_pending_ms = self.store.oldest_pending_age().map(|d| d.as_millis() as u64),
            "Bridge stats"
        );
        snapshot
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
