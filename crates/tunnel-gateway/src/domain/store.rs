//! State Store - registry of in-flight requests and unpublished responses.
//!
//! One sharded map holds a single slot per request ID, so every transition of
//! an ID (register → complete → retire) happens under that ID's shard lock and
//! no caller ever sees two records for the same ID.
//!
//! Retired IDs are remembered for a retention window to keep deduplicating
//! clients that resubmit after their response was published. The retired
//! marker is written *before* the pending slot is removed, so there is no
//! instant at which an ID is unknown.
//!
//! Every slot carries its lifecycle `Stage` and each operation advances it
//! through `Stage::advance`, so an out-of-order call is refused instead of
//! silently overwriting the slot.

use crate::domain::error::StoreError;
use crate::domain::lifecycle::Stage;
use crate::ports::Clock;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tunnel_types::{Request, Response};

/// Slot held for one request ID
enum Slot {
    InFlight {
        request: Request,
        stage: Stage,
        since: Instant,
    },
    Pending {
        response: Response,
        stage: Stage,
        since: Instant,
    },
}

/// How a retired ID left the store
#[derive(Debug, Clone, Copy)]
struct Retired {
    at: Instant,
    outcome: Stage,
}

/// Copy of a slot handed out by `get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    InFlight { request: Request, stage: Stage },
    Pending(Response),
}

/// Backlog sizes exposed to stats and the admin API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub pending_requests: usize,
    pub pending_responses: usize,
}

/// Statistics for the state store
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Requests accepted by `put_request`
    pub total_registered: AtomicU64,
    /// Requests rejected as duplicates
    pub total_duplicates: AtomicU64,
    /// Responses stored
    pub total_completed: AtomicU64,
    /// Responses retired after a confirmed publish
    pub total_published: AtomicU64,
    /// Responses dropped by the retry policy
    pub total_abandoned: AtomicU64,
}

pub struct StateStore {
    entries: DashMap<String, Slot>,
    retired: DashMap<String, Retired>,
    in_flight: AtomicUsize,
    pending: AtomicUsize,
    retention: Duration,
    clock: Arc<dyn Clock>,
    stats: StoreStats,
}

impl StateStore {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            retired: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            retention,
            clock,
            stats: StoreStats::default(),
        }
    }

    /// Register a newly discovered request.
    ///
    /// Fails with `Duplicate` if the ID is in flight, awaiting publish, or
    /// retired within the retention window.
    pub fn put_request(&self, request: Request) -> Result<(), StoreError> {
        match self.entries.entry(request.id.clone()) {
            Entry::Occupied(_) => {
                self.stats.total_duplicates.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::Duplicate(request.id))
            }
            Entry::Vacant(vacant) => {
                if self.retired.contains_key(&request.id) {
                    self.stats.total_duplicates.fetch_add(1, Ordering::Relaxed);
                    return Err(StoreError::Duplicate(request.id));
                }
                vacant.insert(Slot::InFlight {
                    request,
                    stage: Stage::Discovered,
                    since: self.clock.now(),
                });
                self.in_flight.fetch_add(1, Ordering::Relaxed);
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Move the slot for `id` to `next`.
    ///
    /// Returns false if the ID is not stored or the transition is illegal.
    /// Reaching `Completed` or a terminal stage goes through `put_response`,
    /// `delete` and `abandon` instead.
    pub fn advance(&self, id: &str, next: Stage) -> bool {
        if next == Stage::Completed || next.is_terminal() {
            return false;
        }
        let Some(mut slot) = self.entries.get_mut(id) else {
            return false;
        };
        let stage = match &mut *slot {
            Slot::InFlight { stage, .. } | Slot::Pending { stage, .. } => stage,
        };
        match stage.advance(next) {
            Ok(s) => {
                *stage = s;
                true
            }
            Err(e) => {
                warn!(request_id = id, error = %e, "Rejected lifecycle transition");
                false
            }
        }
    }

    /// Current stage of `id`, including the outcome of a retired ID
    pub fn stage(&self, id: &str) -> Option<Stage> {
        if let Some(slot) = self.entries.get(id) {
            return Some(match &*slot {
                Slot::InFlight { stage, .. } | Slot::Pending { stage, .. } => *stage,
            });
        }
        self.retired.get(id).map(|r| r.outcome)
    }

    /// Store the single response for its ID.
    ///
    /// The in-flight request must have passed admission. An existing pending
    /// response is never replaced; returns false in that case, when the
    /// request is still at `Discovered`, or when the ID was already retired.
    /// A response for an unregistered ID is accepted as already completed.
    pub fn put_response(&self, response: Response) -> bool {
        let now = self.clock.now();
        match self.entries.entry(response.id.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                Slot::InFlight { stage, since, .. } => {
                    let stage = match stage
                        .advance(Stage::Completed)
                        .and_then(|s| s.advance(Stage::PublishPending))
                    {
                        Ok(stage) => stage,
                        Err(e) => {
                            warn!(request_id = %response.id, error = %e, "Response refused");
                            return false;
                        }
                    };
                    debug!(
                        request_id = %response.id,
                        status_code = response.status_code,
                        elapsed_ms = now.saturating_duration_since(*since).as_millis() as u64,
                        "Request completed"
                    );
                    occupied.insert(Slot::Pending {
                        response,
                        stage,
                        since: now,
                    });
                    self.in_flight.fetch_sub(1, Ordering::Relaxed);
                    self.pending.fetch_add(1, Ordering::Relaxed);
                    self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Slot::Pending { .. } => {
                    warn!(request_id = %response.id, "Response already pending, keeping the first");
                    false
                }
            },
            Entry::Vacant(vacant) => {
                if self.retired.contains_key(&response.id) {
                    warn!(request_id = %response.id, "Response for retired request dropped");
                    return false;
                }
                vacant.insert(Slot::Pending {
                    response,
                    stage: Stage::PublishPending,
                    since: now,
                });
                self.pending.fetch_add(1, Ordering::Relaxed);
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredEntry> {
        self.entries.get(id).map(|slot| match &*slot {
            Slot::InFlight { request, stage, .. } => StoredEntry::InFlight {
                request: request.clone(),
                stage: *stage,
            },
            Slot::Pending { response, .. } => StoredEntry::Pending(response.clone()),
        })
    }

    /// Retire a published response. Returns false if `id` is not pending.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.retire(id, Stage::Published);
        if removed {
            self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop a response the retry policy gave up on
    pub fn abandon(&self, id: &str) -> bool {
        let removed = self.retire(id, Stage::Abandoned);
        if removed {
            self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    fn retire(&self, id: &str, outcome: Stage) -> bool {
        if !outcome.is_terminal() {
            return false;
        }
        {
            let Some(mut slot) = self.entries.get_mut(id) else {
                return false;
            };
            let Slot::Pending { stage, .. } = &mut *slot else {
                return false;
            };
            match stage.advance(outcome) {
                Ok(s) => *stage = s,
                Err(e) => {
                    warn!(request_id = id, error = %e, "Rejected lifecycle transition");
                    return false;
                }
            }
            self.retired.insert(
                id.to_string(),
                Retired {
                    at: self.clock.now(),
                    outcome,
                },
            );
        }

        let removed = self
            .entries
            .remove_if(id, |_, slot| matches!(slot, Slot::Pending { .. }))
            .is_some();
        if removed {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Point-in-time copy of every pending response.
    ///
    /// Shard locks are released before this returns, so callers can do I/O
    /// while iterating.
    pub fn snapshot(&self) -> Vec<Response> {
        self.entries
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Pending { response, .. } => Some(response.clone()),
                Slot::InFlight { .. } => None,
            })
            .collect()
    }

    /// Whether `id` is in flight, pending, or recently retired
    pub fn is_known(&self, id: &str) -> bool {
        self.entries.contains_key(id) || self.retired.contains_key(id)
    }

    /// Forget retired IDs older than the retention window.
    ///
    /// Returns the number of IDs forgotten.
    pub fn purge_retired(&self) -> usize {
        let now = self.clock.now();
        let before = self.retired.len();
        self.retired
            .retain(|_, r| now.saturating_duration_since(r.at) < self.retention);
        before.saturating_sub(self.retired.len())
    }

    /// Age of the oldest pending response
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Pending { since, .. } => Some(now.saturating_duration_since(*since)),
                Slot::InFlight { .. } => None,
            })
            .max()
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            pending_requests: self.in_flight.load(Ordering::Relaxed),
            pending_responses: self.pending.load(Ordering::Relaxed),
        }
    }

    /// Retired IDs still remembered for deduplication
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }
}
