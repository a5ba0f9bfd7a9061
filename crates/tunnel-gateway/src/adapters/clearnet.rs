//! Clearnet executor backed by `reqwest`.
//!
//! Runs one tunnelled request against the open Internet and folds every
//! outcome, including failures, into a `Response`.

use crate::domain::config::ClearnetConfig;
use crate::domain::error::{status_line, GatewayError, RequestError};
use crate::ports::ClearnetExecutor;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Method, Url};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{debug, info_span, Instrument, Span};
use tunnel_types::{Request, Response};

/// Header stamped on every outbound request
pub const BRIDGE_HEADER: &str = "x-clearnet-bridge";

pub struct ReqwestExecutor {
    client: reqwest::Client,
    bridge_value: HeaderValue,
    max_body_bytes: usize,
    timeout: Duration,
    span: Span,
}

impl ReqwestExecutor {
    pub fn new(config: &ClearnetConfig) -> Result<Self, GatewayError> {
        let max_redirects = config.max_redirects;
        // `previous` holds every URL already requested, so the redirect that
        // would be hop `max_redirects + 1` is handed back instead of followed.
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .redirect(policy)
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::HttpClient(e.to_string()))?;

        let bridge_value = HeaderValue::from_str(&format!("overlay-tunnel/{}", crate::VERSION))
            .map_err(|e| GatewayError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            bridge_value,
            max_body_bytes: config.max_body_bytes,
            timeout: config.timeout,
            span: info_span!("clearnet"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn build(&self, request: &Request) -> Result<reqwest::RequestBuilder, RequestError> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            RequestError::InvalidRequest(format!("invalid method {:?}", request.method))
        })?;

        let url = Url::parse(&request.url).map_err(|e| {
            RequestError::InvalidRequest(format!("invalid url {:?}: {}", request.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestError::InvalidRequest(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::with_capacity(request.headers.len() + 1);
        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                RequestError::InvalidRequest(format!("invalid header name {:?}", name))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                RequestError::InvalidRequest(format!("invalid value for header {:?}", name))
            })?;
            headers.insert(header_name, header_value);
        }
        headers.insert(
            HeaderName::from_static(BRIDGE_HEADER),
            self.bridge_value.clone(),
        );

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }

    async fn fetch(&self, request: &Request) -> Result<Response, RequestError> {
        let mut upstream = self
            .build(request)?
            .send()
            .await
            .map_err(|e| RequestError::UpstreamFailure(self.describe(&e)))?;

        let status_code = upstream.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in upstream.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = self.read_body(&mut upstream).await?;

        Ok(Response {
            id: request.id.clone(),
            status_code,
            status: status_line(status_code),
            headers,
            body,
            error: None,
        })
    }

    async fn read_body(&self, upstream: &mut reqwest::Response) -> Result<Vec<u8>, RequestError> {
        let limit = self.max_body_bytes;
        let too_large =
            || RequestError::UpstreamFailure(format!("response body exceeds {} bytes", limit));

        if upstream.content_length().is_some_and(|len| len > limit as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = upstream
            .chunk()
            .await
            .map_err(|e| RequestError::UpstreamFailure(self.describe(&e)))?
        {
            if body.len() + chunk.len() > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Human-readable transport error including its causes
    fn describe(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            return format!("request timed out after {:?}", self.timeout);
        }
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[async_trait]
impl ClearnetExecutor for ReqwestExecutor {
    async fn execute(&self, request: Request) -> Response {
        let span = self.span.clone();
        async move {
            match self.fetch(&request).await {
                Ok(response) => {
                    debug!(
                        request_id = %request.id,
                        status_code = response.status_code,
                        body_len = response.body.len(),
                        "Clearnet fetch completed"
                    );
                    response
                }
                Err(e) => {
                    debug!(request_id = %request.id, error = %e, "Clearnet fetch failed");
                    e.into_response(request.id)
                }
            }
        }
        .instrument(span)
        .await
    }
}
