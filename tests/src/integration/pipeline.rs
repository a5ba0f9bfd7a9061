//! # Pipeline Integration Tests
//!
//! A client submits through the loopback overlay, the bridge ingests, admits,
//! executes against a local origin and publishes; the client reads the
//! response from the bridge's public namespace.
//!
//! ## Flow Tested:
//!
//! ```text
//! client ──submit──→ KSK@<queue>/request-<n> ──ingest──→ admit ──→ reqwest ──→ origin
//!                                                          │
//! client ←──fetch── <public>/response-<id> ←──publish── StateStore
//! ```

#[cfg(test)]
mod tests {
    use crate::support::{fast_config, wait_for_response, Bridge, Origin};
    use std::time::Duration;
    use tunnel_gateway::{LoopbackConnector, OverlayError, TunnelService};
    use tunnel_types::Request;

    // =============================================================================
    // END-TO-END
    // =============================================================================

    #[tokio::test]
    async fn test_request_round_trip() {
        let origin = Origin::spawn().await;
        let bridge = Bridge::start(fast_config()).await;

        bridge
            .submit(Request::new("alice:1", "GET", origin.url("/hello")))
            .await;
        let resp = bridge.response("alice:1").await;

        assert_eq!(resp.id, "alice:1");
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.status, "200 OK");
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.headers.get("x-origin").map(String::as_str), Some("test"));
        assert!(resp.error.is_none());

        // retired once the publish was confirmed
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bridge.service.store().snapshot().is_empty());
        assert!(bridge.service.store().is_known("alice:1"));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_post_with_body_and_headers() {
        let origin = Origin::spawn().await;
        let bridge = Bridge::start(fast_config()).await;

        let request = Request::new("bob:7", "POST", origin.url("/echo"))
            .with_header("x-test", "tagged")
            .with_body(b"payload".to_vec());
        bridge.submit(request).await;
        let resp = bridge.response("bob:7").await;

        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.status, "201 Created");
        assert_eq!(String::from_utf8_lossy(&resp.body), "POST tagged payload");

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_unresolvable_origin_yields_bad_gateway() {
        let bridge = Bridge::start(fast_config()).await;

        bridge
            .submit(Request::new("r1", "GET", "http://example.invalid/"))
            .await;
        let resp = bridge.response("r1").await;

        assert_eq!(resp.id, "r1");
        assert_eq!(resp.status_code, 502);
        assert!(!resp.error.unwrap_or_default().is_empty());

        bridge.stop().await;
    }

    // =============================================================================
    // ADMISSION
    // =============================================================================

    #[tokio::test]
    async fn test_rate_limit_per_identity() {
        let origin = Origin::spawn().await;
        let mut config = fast_config();
        config.rate_limit.limit = 1;
        config.rate_limit.window = Duration::from_secs(60);
        let bridge = Bridge::start(config).await;

        bridge
            .submit(Request::new("alice:1", "GET", origin.url("/hello")))
            .await;
        bridge
            .submit(Request::new("alice:2", "GET", origin.url("/hello")))
            .await;
        bridge
            .submit(Request::new("carol:1", "GET", origin.url("/hello")))
            .await;

        assert_eq!(bridge.response("alice:1").await.status_code, 200);
        let limited = bridge.response("alice:2").await;
        assert_eq!(limited.status_code, 429);
        assert_eq!(limited.status, "429 Too Many Requests");
        assert!(limited.is_error());
        assert_eq!(bridge.response("carol:1").await.status_code, 200);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_block_and_allow_lists() {
        let origin = Origin::spawn().await;
        let mut config = fast_config();
        config.access.allow = vec!["127.0.0.1".into()];
        config.access.block = vec!["/cookies".into()];
        let bridge = Bridge::start(config).await;

        bridge
            .submit(Request::new("c:1", "GET", origin.url("/hello")))
            .await;
        bridge
            .submit(Request::new("c:2", "GET", origin.url("/cookies")))
            .await;
        bridge
            .submit(Request::new("c:3", "GET", "http://example.invalid/"))
            .await;

        assert_eq!(bridge.response("c:1").await.status_code, 200);
        assert_eq!(bridge.response("c:2").await.status_code, 403);
        let denied = bridge.response("c:3").await;
        assert_eq!(denied.status_code, 403);
        assert!(denied.error.unwrap().contains("allowed"));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_request_answered_with_400() {
        let bridge = Bridge::start(fast_config()).await;

        bridge
            .submit(Request::new("c:1", "GET", "gopher://old.example/"))
            .await;
        let resp = bridge.response("c:1").await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.status, "400 Bad Request");

        bridge.stop().await;
    }

    // =============================================================================
    // DEDUPLICATION
    // =============================================================================

    #[tokio::test]
    async fn test_resubmitted_id_answered_once() {
        let origin = Origin::spawn().await;
        let bridge = Bridge::start(fast_config()).await;

        bridge
            .submit(Request::new("dup:1", "GET", origin.url("/hello")))
            .await;
        let first = bridge.response("dup:1").await;

        // same ID after the response went out
        bridge
            .submit(Request::new("dup:1", "GET", origin.url("/chain/0")))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(bridge.service.ingestor().cursor().await, 2);
        assert_eq!(bridge.service.store().counts().pending_requests, 0);
        assert_eq!(bridge.service.store().counts().pending_responses, 0);
        assert_eq!(bridge.response("dup:1").await, first);

        bridge.stop().await;
    }

    // =============================================================================
    // PUBLISH FAILURES
    // =============================================================================

    #[tokio::test]
    async fn test_failed_publish_retried_until_overlay_recovers() {
        let origin = Origin::spawn().await;
        let connector = LoopbackConnector::default();
        let overlay = connector.overlay();
        let service = TunnelService::bootstrap(fast_config(), &connector)
            .await
            .unwrap();
        let client = RequestSubmitter::new(&overlay, &service);

        client.submit(Request::new("p:1", "GET", origin.url("/hello"))).await;
        let ingestor = service.ingestor();
        assert_eq!(ingestor.poll_once().await.dispatched, 1);
        ingestor.drain().await;

        let store = service.store();
        let pending = store.snapshot();
        assert_eq!(pending.len(), 1);

        overlay.set_put_failure(Some(OverlayError::PutFailed("no route".into())));
        let publisher = service.publisher();
        for _ in 0..3 {
            let report = publisher.publish_once().await;
            assert_eq!(report.failed, 1);
            assert_eq!(store.snapshot(), pending);
        }
        assert_eq!(publisher.failures("p:1"), 3);

        overlay.set_put_failure(None);
        assert_eq!(publisher.publish_once().await.published, 1);
        assert!(store.snapshot().is_empty());

        let resp = wait_for_response(&overlay, &service.keys().public, "p:1").await;
        assert_eq!(resp, pending[0]);
    }

    #[tokio::test]
    async fn test_overlay_drop_stops_service() {
        let bridge = Bridge::start(fast_config()).await;
        let mut stopping = bridge.service.shutdown_signal();

        bridge.overlay.close();
        tokio::time::timeout(Duration::from_secs(5), stopping.wait_for(|stop| *stop))
            .await
            .unwrap()
            .unwrap();

        bridge.stop().await;
    }

    /// Client-side view of one bridge
    struct RequestSubmitter<'a> {
        overlay: &'a tunnel_gateway::MemoryOverlay,
        service: &'a TunnelService,
    }

    impl<'a> RequestSubmitter<'a> {
        fn new(overlay: &'a tunnel_gateway::MemoryOverlay, service: &'a TunnelService) -> Self {
            Self { overlay, service }
        }

        async fn submit(&self, request: Request) {
            self.overlay
                .submit(self.service.queue(), &request)
                .await
                .unwrap();
        }
    }
}
