//! # Clearnet Executor Tests
//!
//! `ReqwestExecutor` against a local axum origin: redirects, header
//! injection, response normalization, body cap, timeout and refused
//! connections.

#[cfg(test)]
mod tests {
    use crate::support::Origin;
    use std::time::Duration;
    use tunnel_gateway::domain::ClearnetConfig;
    use tunnel_gateway::{ClearnetExecutor, ReqwestExecutor, VERSION};
    use tunnel_types::{Request, Response};

    async fn execute(config: ClearnetConfig, url: String) -> Response {
        ReqwestExecutor::new(&config)
            .unwrap()
            .execute(Request::new("r1", "GET", url))
            .await
    }

    // =============================================================================
    // REDIRECTS
    // =============================================================================

    #[tokio::test]
    async fn test_redirect_cap_returns_eleventh_redirect() {
        let origin = Origin::spawn().await;
        let resp = execute(ClearnetConfig::default(), origin.url("/hop/0")).await;

        // initial request plus 10 followed redirects
        assert_eq!(origin.hits(), 11);
        assert_eq!(resp.status_code, 302);
        assert_eq!(resp.status, "302 Found");
        assert_eq!(resp.headers.get("location").map(String::as_str), Some("/hop/11"));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_redirect_cap_is_configurable() {
        let origin = Origin::spawn().await;
        let config = ClearnetConfig {
            max_redirects: 2,
            ..ClearnetConfig::default()
        };
        let resp = execute(config, origin.url("/hop/0")).await;
        assert_eq!(origin.hits(), 3);
        assert_eq!(resp.headers.get("location").map(String::as_str), Some("/hop/3"));
    }

    #[tokio::test]
    async fn test_redirect_chain_followed_to_final_response() {
        let origin = Origin::spawn().await;
        let resp = execute(ClearnetConfig::default(), origin.url("/chain/0")).await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, b"done");
    }

    // =============================================================================
    // REQUEST SHAPING
    // =============================================================================

    #[tokio::test]
    async fn test_bridge_header_injected() {
        let origin = Origin::spawn().await;
        let resp = execute(ClearnetConfig::default(), origin.url("/bridge-header")).await;
        assert_eq!(
            String::from_utf8_lossy(&resp.body),
            format!("overlay-tunnel/{}", VERSION)
        );
    }

    #[tokio::test]
    async fn test_bridge_header_cannot_be_spoofed() {
        let origin = Origin::spawn().await;
        let resp = ReqwestExecutor::new(&ClearnetConfig::default())
            .unwrap()
            .execute(
                Request::new("r1", "GET", origin.url("/bridge-header"))
                    .with_header("X-Clearnet-Bridge", "someone-else/9.9"),
            )
            .await;
        assert_eq!(
            String::from_utf8_lossy(&resp.body),
            format!("overlay-tunnel/{}", VERSION)
        );
    }

    #[tokio::test]
    async fn test_method_headers_and_body_forwarded() {
        let origin = Origin::spawn().await;
        let resp = ReqwestExecutor::new(&ClearnetConfig::default())
            .unwrap()
            .execute(
                Request::new("r1", "PUT", origin.url("/echo"))
                    .with_header("x-test", "abc")
                    .with_body(b"data".to_vec()),
            )
            .await;
        assert_eq!(resp.status_code, 201);
        assert_eq!(String::from_utf8_lossy(&resp.body), "PUT abc data");
    }

    // =============================================================================
    // RESPONSE NORMALIZATION
    // =============================================================================

    #[tokio::test]
    async fn test_first_header_value_wins() {
        let origin = Origin::spawn().await;
        let resp = execute(ClearnetConfig::default(), origin.url("/cookies")).await;
        assert_eq!(resp.headers.get("set-cookie").map(String::as_str), Some("first=1"));
    }

    #[tokio::test]
    async fn test_origin_error_status_is_not_a_bridge_error() {
        let origin = Origin::spawn().await;
        let resp = execute(ClearnetConfig::default(), origin.url("/nowhere")).await;
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.status, "404 Not Found");
        assert!(resp.error.is_none());
    }

    // =============================================================================
    // FAILURES
    // =============================================================================

    #[tokio::test]
    async fn test_body_cap() {
        let origin = Origin::spawn().await;
        let config = ClearnetConfig {
            max_body_bytes: 1024,
            ..ClearnetConfig::default()
        };

        let within = execute(config.clone(), origin.url("/big/1024")).await;
        assert_eq!(within.status_code, 200);
        assert_eq!(within.body.len(), 1024);

        let over = execute(config, origin.url("/big/4096")).await;
        assert_eq!(over.status_code, 502);
        assert!(over.body.is_empty());
        assert!(over.error.unwrap().contains("1024"));
    }

    #[tokio::test]
    async fn test_timeout_is_bad_gateway() {
        let origin = Origin::spawn().await;
        let config = ClearnetConfig {
            timeout: Duration::from_millis(200),
            ..ClearnetConfig::default()
        };
        let resp = execute(config, origin.url("/slow")).await;
        assert_eq!(resp.status_code, 502);
        assert!(resp.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_bad_gateway() {
        // grab a free port and release it
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resp = execute(ClearnetConfig::default(), format!("http://{}/", addr)).await;
        assert_eq!(resp.status_code, 502);
        assert_eq!(resp.status, "502 Bad Gateway");
        assert!(!resp.error.unwrap().is_empty());
    }
}
