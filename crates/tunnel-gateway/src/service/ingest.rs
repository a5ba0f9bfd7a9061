//! Request ingestion.
//!
//! Every tick reads the request queue from the cursor onward, registers each
//! decoded request, runs admission inline and hands admitted requests to the
//! clearnet executor on their own task. The clearnet fetch never runs on the
//! ingestion task itself.
//!
//! A shutdown interrupts a running tick between overlay fetches. The cursor
//! only moves past slots that were read, so nothing is skipped.

use crate::domain::access::{AccessController, Decision};
use crate::domain::config::IngestConfig;
use crate::domain::error::RequestError;
use crate::domain::lifecycle::Stage;
use crate::domain::store::StateStore;
use crate::ports::{ClearnetExecutor, OverlayClient};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use tunnel_types::{decode_request, validate_request_id, Request, RequestQueue};

/// Outcome of one ingestion tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Slots read and consumed
    pub discovered: usize,
    /// Requests handed to the executor
    pub dispatched: usize,
    /// Requests answered by admission with an error response
    pub rejected: usize,
    /// Requests whose ID was already known
    pub duplicates: usize,
    /// Slots that did not hold a usable request
    pub malformed: usize,
}

/// What happened to one discovered request
#[derive(Debug)]
pub enum Dispatch {
    Duplicate,
    /// Denied by admission with this status code
    Rejected(u16),
    /// Executing on its own task
    Spawned(JoinHandle<()>),
}

pub struct RequestIngestor {
    overlay: Arc<dyn OverlayClient>,
    queue: RequestQueue,
    store: Arc<StateStore>,
    access: Arc<AccessController>,
    executor: Arc<dyn ClearnetExecutor>,
    fetch_permits: Arc<Semaphore>,
    /// Next unread slot; held for a whole tick
    cursor: AsyncMutex<u64>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: IngestConfig,
    span: Span,
}

impl RequestIngestor {
    pub fn new(
        overlay: Arc<dyn OverlayClient>,
        queue: RequestQueue,
        store: Arc<StateStore>,
        access: Arc<AccessController>,
        executor: Arc<dyn ClearnetExecutor>,
        config: IngestConfig,
    ) -> Self {
        Self {
            overlay,
            queue,
            store,
            access,
            executor,
            fetch_permits: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            cursor: AsyncMutex::new(0),
            tasks: Mutex::new(Vec::new()),
            config,
            span: info_span!("ingest"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Index of the next slot to read
    pub async fn cursor(&self) -> u64 {
        *self.cursor.lock().await
    }

    /// Read up to `batch_size` slots and dispatch what they hold.
    ///
    /// Stops at the first empty slot or fetch error. Every slot that was read
    /// advances the cursor, usable or not.
    pub async fn poll_once(&self) -> IngestReport {
        let mut report = IngestReport::default();
        let mut cursor = self.cursor.lock().await;

        for _ in 0..self.config.batch_size {
            let slot = *cursor;
            let uri = self.queue.slot_uri(slot);
            let bytes = match timeout(self.config.fetch_timeout, self.overlay.fetch(&uri)).await {
                Ok(Ok(Some(bytes))) => bytes,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!(parent: &self.span, slot, error = %e, "Queue fetch failed");
                    break;
                }
                Err(_) => {
                    warn!(parent: &self.span, slot, timeout = ?self.config.fetch_timeout, "Queue fetch timed out");
                    break;
                }
            };
            *cursor = slot + 1;
            report.discovered += 1;

            let request = match parse_slot(&bytes) {
                Ok(request) => request,
                Err(reason) => {
                    warn!(parent: &self.span, slot, reason = %reason, "Skipping malformed queue slot");
                    report.malformed += 1;
                    continue;
                }
            };

            match self.dispatch(request) {
                Dispatch::Duplicate => report.duplicates += 1,
                Dispatch::Rejected(_) => report.rejected += 1,
                Dispatch::Spawned(handle) => {
                    self.track(handle);
                    report.dispatched += 1;
                }
            }
        }

        report
    }

    /// Register, admit and either answer or execute one request
    pub fn dispatch(&self, request: Request) -> Dispatch {
        let id = request.id.clone();
        if let Err(e) = self.store.put_request(request.clone()) {
            debug!(parent: &self.span, request_id = %id, error = %e, "Dropping duplicate request");
            return Dispatch::Duplicate;
        }
        self.store.advance(&id, Stage::AdmissionChecked);

        if let Decision::Deny(e) = self.access.admit(&id, &request.url) {
            let status_code = e.status_code();
            debug!(parent: &self.span, request_id = %id, status_code, reason = %e, "Request rejected");
            self.store.put_response(e.into_response(id));
            return Dispatch::Rejected(status_code);
        }

        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let permits = Arc::clone(&self.fetch_permits);
        let span = self.span.clone();
        let handle = tokio::spawn(
            async move {
                let response = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        store.advance(&id, Stage::Executing);
                        debug!(request_id = %id, method = %request.method, url = %request.url, "Executing request");
                        match AssertUnwindSafe(executor.execute(request)).catch_unwind().await {
                            Ok(response) => response,
                            Err(_) => {
                                error!(request_id = %id, "Clearnet executor panicked");
                                RequestError::UpstreamFailure("clearnet executor panicked".into())
                                    .into_response(id.clone())
                            }
                        }
                    }
                    Err(_) => RequestError::UpstreamFailure("executor shut down".into())
                        .into_response(id.clone()),
                };
                store.put_response(response);
            }
            .instrument(span),
        );
        Dispatch::Spawned(handle)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Wait for every clearnet fetch started so far
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(parent: &self.span, error = %e, "Executor task failed");
            }
        }
    }

    /// Ingestion loop; exits when `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(parent: &self.span, queue = %self.queue.name(), interval = ?self.config.interval, "Request ingestor started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = tokio::select! {
                        report = self.poll_once() => report,
                        _ = shutdown.wait_for(|stop| *stop) => {
                            debug!(parent: &self.span, "Ingestion tick interrupted by shutdown");
                            break;
                        }
                    };
                    self.access.evict_idle();
                    if report.discovered > 0 {
                        info!(
                            parent: &self.span,
                            discovered = report.discovered,
                            dispatched = report.dispatched,
                            rejected = report.rejected,
                            duplicates = report.duplicates,
                            malformed = report.malformed,
                            "Ingested requests"
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

        info!(parent: &self.span, "Request ingestor stopped");
    }
}

fn parse_slot(bytes: &[u8]) -> Result<Request, String> {
    let request = decode_request(bytes).map_err(|e| e.to_string())?;
    validate_request_id(&request.id).map_err(|e| e.to_string())?;
    Ok(request)
}
