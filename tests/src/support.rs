//! Shared fixtures.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{any, get};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tunnel_gateway::{LoopbackConnector, MemoryOverlay, TunnelConfig, TunnelService};
use tunnel_types::{Request, Response};

// =============================================================================
// LOCAL ORIGIN
// =============================================================================

#[derive(Clone, Default)]
struct OriginState {
    hits: Arc<AtomicUsize>,
}

/// HTTP server on 127.0.0.1 with a fixed set of routes:
///
/// - `/hello` 200 `hello` with `x-origin: test`
/// - `/hop/:n` 302 to `/hop/n+1`, counted in `hits`
/// - `/chain/:n` 302 to `/chain/n+1` until n = 3, then 200 `done`
/// - `/bridge-header` echoes the `x-clearnet-bridge` request header
/// - `/echo` any method, 201 with `<METHOD> <x-test> <body>`
/// - `/big/:len` 200 with `len` bytes
/// - `/slow` answers after 2s
/// - `/cookies` two `set-cookie` headers
pub struct Origin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl Origin {
    pub async fn spawn() -> Self {
        let state = OriginState::default();
        let router = Router::new()
            .route("/hello", get(hello))
            .route("/hop/:n", get(hop))
            .route("/chain/:n", get(chain))
            .route("/bridge-header", get(bridge_header))
            .route("/echo", any(echo))
            .route("/big/:len", get(big))
            .route("/slow", get(slow))
            .route("/cookies", get(cookies))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            hits: state.hits,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests served by `/hop`
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn hello() -> impl IntoResponse {
    ([("x-origin", "test")], "hello")
}

async fn hop(State(state): State<OriginState>, Path(n): Path<u32>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FOUND, [(header::LOCATION, format!("/hop/{}", n + 1))])
}

async fn chain(Path(n): Path<u32>) -> HttpResponse {
    if n < 3 {
        (StatusCode::FOUND, [(header::LOCATION, format!("/chain/{}", n + 1))]).into_response()
    } else {
        (StatusCode::OK, "done").into_response()
    }
}

async fn bridge_header(headers: HeaderMap) -> String {
    headers
        .get("x-clearnet-bridge")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let tag = headers
        .get("x-test")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    (
        StatusCode::CREATED,
        format!("{} {} {}", method, tag, String::from_utf8_lossy(&body)),
    )
}

async fn big(Path(len): Path<usize>) -> Vec<u8> {
    vec![b'x'; len]
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

async fn cookies() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append(header::SET_COOKIE, HeaderValue::from_static("first=1"));
    headers.append(header::SET_COOKIE, HeaderValue::from_static("second=2"));
    (headers, "ok")
}

// =============================================================================
// BRIDGE FIXTURE
// =============================================================================

/// Config with short loop intervals for wall-clock tests
pub fn fast_config() -> TunnelConfig {
    let mut config = TunnelConfig::default();
    config.ingest.interval = Duration::from_millis(20);
    config.publish.interval = Duration::from_millis(20);
    config.stats.interval = Duration::from_secs(1);
    config.admin.enabled = false;
    config
}

/// Running bridge on a loopback overlay
pub struct Bridge {
    pub service: TunnelService,
    pub overlay: Arc<MemoryOverlay>,
}

impl Bridge {
    pub async fn start(config: TunnelConfig) -> Self {
        let connector = LoopbackConnector::default();
        let mut service = TunnelService::bootstrap(config, &connector).await.unwrap();
        service.start();
        Self {
            service,
            overlay: connector.overlay(),
        }
    }

    /// Submit as an overlay client would
    pub async fn submit(&self, request: Request) {
        self.overlay
            .submit(self.service.queue(), &request)
            .await
            .unwrap();
    }

    /// Poll the client side until the response for `id` shows up
    pub async fn response(&self, id: &str) -> Response {
        wait_for_response(&self.overlay, &self.service.keys().public, id).await
    }

    pub async fn stop(mut self) {
        self.service.shutdown().await;
    }
}

pub async fn wait_for_response(overlay: &MemoryOverlay, public_key: &str, id: &str) -> Response {
    let poll = async {
        loop {
            if let Some(response) = overlay.fetch_response(public_key, id).await.unwrap() {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .unwrap_or_else(|_| panic!("no response for {} within 10s", id))
}
