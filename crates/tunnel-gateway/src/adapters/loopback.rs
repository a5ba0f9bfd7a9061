//! In-process overlay.
//!
//! Keys are write-once: a second put at an occupied key fails with
//! `OverlayError::Collision`. Data inserted under a private key generated by
//! this overlay is readable under the matching public key, the way signed
//! subspace keys behave on a real overlay. Writing under a public key
//! directly is refused, so only the holder of the private key can populate
//! its namespace.

use crate::domain::config::OverlayConfig;
use crate::ports::{OverlayClient, OverlayConnector, OverlayError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use tunnel_types::{
    decode_response, encode_request, response_uri, KeyPair, Request, RequestQueue, Response,
};

/// Endpoint name accepted by `LoopbackConnector`
pub const LOOPBACK_ENDPOINT: &str = "loopback";

pub struct MemoryOverlay {
    data: DashMap<String, Vec<u8>>,
    /// private key → public key
    namespaces: DashMap<String, String>,
    /// Public keys of generated pairs; read-only namespaces
    signed: DashSet<String>,
    put_failure: Mutex<Option<OverlayError>>,
    fetch_failure: Mutex<Option<OverlayError>>,
    puts: AtomicU64,
    closed: watch::Sender<bool>,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            data: DashMap::new(),
            namespaces: DashMap::new(),
            signed: DashSet::new(),
            put_failure: Mutex::new(None),
            fetch_failure: Mutex::new(None),
            puts: AtomicU64::new(0),
            closed,
        }
    }

    /// Make every subsequent put fail with `error` until cleared with `None`
    pub fn set_put_failure(&self, error: Option<OverlayError>) {
        *self.put_failure.lock() = error;
    }

    /// Make every subsequent fetch fail with `error` until cleared with `None`
    pub fn set_fetch_failure(&self, error: Option<OverlayError>) {
        *self.fetch_failure.lock() = error;
    }

    /// Drop the connection; `listen` returns `Err(Closed)`
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Successful puts so far
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rewrite an insert URI under a known private key to its public form
    fn resolve(&self, uri: &str) -> String {
        if let Some((namespace, rest)) = uri.split_once('/') {
            if let Some(public) = self.namespaces.get(namespace) {
                return format!("{}/{}", public.value(), rest);
            }
        }
        uri.to_string()
    }

    fn is_signed_namespace(&self, uri: &str) -> bool {
        uri.split_once('/')
            .is_some_and(|(namespace, _)| self.signed.contains(namespace))
    }

    /// Client side: claim the next free slot of `queue` with `request`.
    ///
    /// Returns the slot index.
    pub async fn submit(&self, queue: &RequestQueue, request: &Request) -> Result<u64, OverlayError> {
        let bytes = encode_request(request).map_err(|e| OverlayError::PutFailed(e.to_string()))?;
        self.submit_raw(queue, bytes).await
    }

    /// Client side: claim the next free slot with arbitrary bytes
    pub async fn submit_raw(&self, queue: &RequestQueue, bytes: Vec<u8>) -> Result<u64, OverlayError> {
        let mut slot = 0u64;
        loop {
            match self.put(&queue.slot_uri(slot), bytes.clone()).await {
                Ok(()) => return Ok(slot),
                Err(OverlayError::Collision(_)) => slot += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Client side: fetch the response for `id` from the server's public namespace
    pub async fn fetch_response(
        &self,
        public_key: &str,
        id: &str,
    ) -> Result<Option<Response>, OverlayError> {
        match self.fetch(&response_uri(public_key, id)).await? {
            Some(bytes) => decode_response(&bytes)
                .map(Some)
                .map_err(|e| OverlayError::FetchFailed(e.to_string())),
            None => Ok(None),
        }
    }
}

impl Default for MemoryOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverlayClient for MemoryOverlay {
    async fn generate_key_pair(&self) -> Result<KeyPair, OverlayError> {
        let signing = SigningKey::generate(&mut OsRng);
        let keys = KeyPair::new(
            format!("pub@{}", hex::encode(signing.verifying_key().to_bytes())),
            format!("priv@{}", hex::encode(signing.to_bytes())),
        );
        self.namespaces
            .insert(keys.private.clone(), keys.public.clone());
        self.signed.insert(keys.public.clone());
        Ok(keys)
    }

    async fn put(&self, uri: &str, data: Vec<u8>) -> Result<(), OverlayError> {
        if let Some(error) = self.put_failure.lock().clone() {
            return Err(error);
        }
        if self.is_signed_namespace(uri) {
            return Err(OverlayError::PutFailed(format!(
                "{} is a signed namespace; insert with its private key",
                uri
            )));
        }
        let key = self.resolve(uri);
        match self.data.entry(key) {
            Entry::Occupied(occupied) => Err(OverlayError::Collision(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                debug!(key = %vacant.key(), len = data.len(), "Loopback put");
                vacant.insert(data);
                self.puts.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn fetch(&self, uri: &str) -> Result<Option<Vec<u8>>, OverlayError> {
        if let Some(error) = self.fetch_failure.lock().clone() {
            return Err(error);
        }
        Ok(self.data.get(&self.resolve(uri)).map(|v| v.value().clone()))
    }

    async fn listen(&self) -> Result<(), OverlayError> {
        let mut closed = self.closed.subscribe();
        // Sender lives in self, so this only errors if the overlay is dropped
        let _ = closed.wait_for(|c| *c).await;
        Err(OverlayError::Closed)
    }
}

/// Hands out a shared `MemoryOverlay` for the `loopback` endpoint
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    overlay: Arc<MemoryOverlay>,
}

impl LoopbackConnector {
    pub fn new(overlay: Arc<MemoryOverlay>) -> Self {
        Self { overlay }
    }

    pub fn overlay(&self) -> Arc<MemoryOverlay> {
        Arc::clone(&self.overlay)
    }
}

#[async_trait]
impl OverlayConnector for LoopbackConnector {
    async fn connect(
        &self,
        config: &OverlayConfig,
    ) -> Result<Arc<dyn OverlayClient>, OverlayError> {
        if config.endpoint != LOOPBACK_ENDPOINT {
            return Err(OverlayError::Connect(format!(
                "unsupported overlay endpoint {:?}",
                config.endpoint
            )));
        }
        let client: Arc<dyn OverlayClient> = self.overlay.clone();
        Ok(client)
    }
}
