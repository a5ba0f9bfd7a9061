//! Tunnel service - wires the pipeline and owns its background tasks.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Connect to the overlay
//! 3. Generate the bridge key pair and derive the request queue
//! 4. Spawn ingestion, publication, stats and the overlay listen task

pub mod ingest;
pub mod publish;
pub mod stats;

pub use ingest::{Dispatch, IngestReport, RequestIngestor};
pub use publish::{PublishReport, ResponsePublisher};
pub use stats::{StatsReporter, StatsSnapshot};

use crate::adapters::ReqwestExecutor;
use crate::domain::access::AccessController;
use crate::domain::config::TunnelConfig;
use crate::domain::error::GatewayError;
use crate::domain::store::StateStore;
use crate::ports::{ClearnetExecutor, Clock, OverlayClient, OverlayConnector, SystemClock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Span};
use tunnel_types::{KeyPair, RequestQueue};

/// Running bridge
pub struct TunnelService {
    config: TunnelConfig,
    keys: KeyPair,
    queue: RequestQueue,
    overlay: Arc<dyn OverlayClient>,
    store: Arc<StateStore>,
    access: Arc<AccessController>,
    ingestor: Arc<RequestIngestor>,
    publisher: Arc<ResponsePublisher>,
    stats: Arc<StatsReporter>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    span: Span,
}

impl TunnelService {
    /// Bootstrap against the real clearnet with the wall clock
    pub async fn bootstrap(
        config: TunnelConfig,
        connector: &dyn OverlayConnector,
    ) -> Result<Self, GatewayError> {
        let executor = ReqwestExecutor::new(&config.clearnet)?;
        Self::bootstrap_with(config, connector, Arc::new(executor), Arc::new(SystemClock)).await
    }

    /// Bootstrap with an explicit executor and clock
    pub async fn bootstrap_with(
        config: TunnelConfig,
        connector: &dyn OverlayConnector,
        executor: Arc<dyn ClearnetExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let span = info_span!("tunnel", server = %config.server.name);

        let overlay = match timeout(config.overlay.connect_timeout, connector.connect(&config.overlay)).await {
            Ok(Ok(overlay)) => overlay,
            Ok(Err(e)) => return Err(GatewayError::ConnectFailure(e.to_string())),
            Err(_) => {
                return Err(GatewayError::ConnectFailure(format!(
                    "no answer from {} within {:?}",
                    config.overlay.endpoint, config.overlay.connect_timeout
                )))
            }
        };

        let keys = overlay
            .generate_key_pair()
            .await
            .map_err(|e| GatewayError::KeyGeneration(e.to_string()))?;
        let queue = match &config.ingest.queue_name {
            Some(name) => RequestQueue::named(name.clone()),
            None => RequestQueue::for_public_key(&keys.public),
        };
        info!(
            parent: &span,
            endpoint = %config.overlay.endpoint,
            public_key = %keys.public,
            queue = %queue.name(),
            "Connected to overlay"
        );

        let store = Arc::new(StateStore::new(
            config.store.retired_retention,
            Arc::clone(&clock),
        ));
        let access = Arc::new(AccessController::new(
            config.rate_limit.clone(),
            config.access.clone(),
            Arc::clone(&clock),
        ));

        let ingestor = RequestIngestor::new(
            Arc::clone(&overlay),
            queue.clone(),
            Arc::clone(&store),
            Arc::clone(&access),
            executor,
            config.ingest.clone(),
        )
        .with_span(info_span!(parent: &span, "ingest"));

        let publisher = ResponsePublisher::new(
            Arc::clone(&overlay),
            keys.private.clone(),
            Arc::clone(&store),
            config.publish.clone(),
            clock,
        )
        .with_span(info_span!(parent: &span, "publish"));

        let stats = StatsReporter::new(Arc::clone(&store), Arc::clone(&access), config.stats.interval)
            .with_span(info_span!(parent: &span, "stats"));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            keys,
            queue,
            overlay,
            store,
            access,
            ingestor: Arc::new(ingestor),
            publisher: Arc::new(publisher),
            stats: Arc::new(stats),
            shutdown_tx,
            tasks: Vec::new(),
            span,
        })
    }

    /// Spawn the background loops
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            warn!(parent: &self.span, "Tunnel service already started");
            return;
        }

        self.tasks.push(tokio::spawn(
            Arc::clone(&self.ingestor).run(self.shutdown_tx.subscribe()),
        ));
        self.tasks.push(tokio::spawn(
            Arc::clone(&self.publisher).run(self.shutdown_tx.subscribe()),
        ));
        self.tasks.push(tokio::spawn(
            Arc::clone(&self.stats).run(self.shutdown_tx.subscribe()),
        ));

        // A dropped overlay connection takes the whole pipeline down
        let overlay = Arc::clone(&self.overlay);
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let span = self.span.clone();
        self.tasks.push(tokio::spawn(async move {
            tokio::select! {
                result = overlay.listen() => {
                    match result {
                        Ok(()) => warn!(parent: &span, "Overlay listen loop ended"),
                        Err(e) => error!(parent: &span, error = %e, "Overlay listen loop failed"),
                    }
                    shutdown_tx.send_replace(true);
                }
                _ = shutdown.wait_for(|stop| *stop) => {}
            }
        }));

        info!(parent: &self.span, "Tunnel service started");
    }

    /// Receiver that flips to true once the service is stopping
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the loops and wait for in-flight clearnet fetches
    pub async fn shutdown(&mut self) {
        info!(parent: &self.span, "Shutting down tunnel service");
        self.shutdown_tx.send_replace(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(parent: &self.span, error = %e, "Background task failed");
            }
        }
        self.ingestor.drain().await;

        let counts = self.store.counts();
        info!(
            parent: &self.span,
            pending_requests = counts.pending_requests,
            pending_responses = counts.pending_responses,
            "Tunnel service stopped"
        );
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn access(&self) -> Arc<AccessController> {
        Arc::clone(&self.access)
    }

    pub fn ingestor(&self) -> Arc<RequestIngestor> {
        Arc::clone(&self.ingestor)
    }

    pub fn publisher(&self) -> Arc<ResponsePublisher> {
        Arc::clone(&self.publisher)
    }

    pub fn stats(&self) -> Arc<StatsReporter> {
        Arc::clone(&self.stats)
    }

    /// Read-only admin API for this service
    pub fn admin_router(&self) -> axum::Router {
        crate::admin::build_admin_router(crate::admin::AdminState {
            server: self.config.server.name.clone(),
            public_key: self.keys.public.clone(),
            request_queue: self.queue.name().to_string(),
            stats: Arc::clone(&self.stats),
        })
    }
}
