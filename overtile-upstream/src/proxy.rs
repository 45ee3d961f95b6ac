//! Pass-through forwarding for non-cacheable endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use overtile_core::FetchError;

use crate::client::UPSTREAM_TIMEOUT;
use crate::pool::{AttemptFailure, UpstreamPool};

/// A buffered client request ready for forwarding.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path plus query string, e.g. `/api/status`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Streamed upstream response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, Box<dyn std::error::Error + Send + Sync>>>;

/// An upstream response handed back to the HTTP layer without buffering.
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

/// The pass-through seam, kept narrow so the HTTP layer can be exercised
/// against a test double.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxiedResponse, FetchError>;
}

/// Forwards requests verbatim to the upstream pool.
///
/// The request's method, path+query, body, and headers (minus `Host` and
/// transport framing headers) go out unchanged. Responses with status 5xx
/// or 429 cool the upstream down and rotate; every other status passes
/// through to the client as-is, 4xx included.
#[derive(Clone)]
pub struct UpstreamProxy {
    pool: Arc<UpstreamPool>,
    http: reqwest::Client,
}

impl UpstreamProxy {
    pub fn new(pool: Arc<UpstreamPool>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self { pool, http })
    }
}

/// Resolves the forwarding target: the upstream URL's origin joined with
/// the incoming path and query.
fn target_url(upstream: &str, path_and_query: &str) -> Result<reqwest::Url, String> {
    let base = reqwest::Url::parse(upstream).map_err(|error| error.to_string())?;
    base.join(path_and_query).map_err(|error| error.to_string())
}

#[async_trait]
impl Forwarder for UpstreamProxy {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxiedResponse, FetchError> {
        let upstream_response = self
            .pool
            .with_upstream(|url| {
                let http = self.http.clone();
                let request = request.clone();
                async move {
                    let target = target_url(&url, &request.path_and_query).map_err(|reason| {
                        AttemptFailure::Transient { reason }
                    })?;
                    let mut headers = request.headers;
                    for name in [HOST, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION] {
                        headers.remove(&name);
                    }
                    debug!(method = %request.method, %target, "forwarding to upstream");
                    let response = http
                        .request(request.method, target)
                        .headers(headers)
                        .body(request.body)
                        .send()
                        .await
                        .map_err(|error| AttemptFailure::Transient {
                            reason: error.to_string(),
                        })?;
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        return Err(AttemptFailure::Transient {
                            reason: format!("upstream status {status}"),
                        });
                    }
                    Ok(response)
                }
            })
            .await?;

        let status = upstream_response.status();
        let headers = upstream_response.headers().clone();
        let body: BodyStream = upstream_response
            .bytes_stream()
            .map_err(|error| Box::new(error) as Box<dyn std::error::Error + Send + Sync>)
            .boxed();
        Ok(ProxiedResponse {
            status,
            headers,
            body,
        })
    }
}
