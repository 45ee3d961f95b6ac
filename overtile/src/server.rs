//! HTTP surface: routing, CORS, body normalization, conditional responses.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use bytes::Bytes;
use tracing::warn;

use overtile_core::etag::{if_none_match_matches, weak_etag};
use overtile_core::{CacheStatus, OverpassResponse};
use overtile_upstream::{Forwarder, ProxyRequest};

use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::ApiError;

/// Cache outcome header stamped on locally served responses.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Upper bound for buffered request bodies.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub forwarder: Arc<dyn Forwarder>,
}

/// Builds the application router: the interpreter endpoint runs through
/// the dispatcher, everything else under `/api` passes through, and a
/// permissive CORS middleware wraps the lot (`OPTIONS` short-circuits to
/// 204 before routing).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/interpreter", get(interpreter).post(interpreter))
        .route("/api/{*rest}", any(passthrough))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// The request body as handed to the dispatcher: raw bytes, text, or a
/// decoded urlencoded form. Normalized once at the edge.
#[derive(Debug)]
enum QueryBody {
    Raw(#[allow(dead_code)] Bytes),
    Text(String),
    Form(HashMap<String, String>),
}

fn parse_query_string(raw: &str) -> HashMap<String, String> {
    serde_qs::Config::new(5, false)
        .deserialize_str(raw)
        .unwrap_or_default()
}

fn normalize_body(content_type: Option<&str>, bytes: Bytes) -> QueryBody {
    if content_type
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
    {
        let text = String::from_utf8_lossy(&bytes);
        let form = parse_query_string(&text);
        if !form.is_empty() {
            return QueryBody::Form(form);
        }
    }
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => QueryBody::Text(text),
        Err(_) => QueryBody::Raw(bytes),
    }
}

async fn interpreter(State(state): State<AppState>, request: Request) -> Response {
    match handle_interpreter(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn handle_interpreter(state: &AppState, request: Request) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::bad_request("Unreadable request body"))?;

    let params = parts
        .uri
        .query()
        .map(parse_query_string)
        .unwrap_or_default();
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let query_body = normalize_body(content_type, bytes.clone());

    let query_text: Option<String> = if parts.method == Method::GET {
        params.get("data").or_else(|| params.get("q")).cloned()
    } else {
        match &query_body {
            QueryBody::Form(form) => form.get("data").cloned(),
            QueryBody::Text(text) if !text.trim().is_empty() => Some(text.clone()),
            _ => None,
        }
    };
    let amenity_param = match &query_body {
        QueryBody::Form(form) => form.get("amenity").cloned(),
        _ => None,
    }
    .or_else(|| params.get("amenity").cloned());

    match state
        .dispatcher
        .dispatch(query_text.as_deref(), amenity_param.as_deref())
        .await
    {
        Ok(Dispatch::Cached { response, status }) => {
            cached_response(&parts.headers, &response, status)
        }
        Ok(Dispatch::Proxy) => forward(state, &parts, bytes).await,
        Err(error) => Err(error.into()),
    }
}

/// Renders a locally served payload: ETag negotiation first, then the full
/// JSON body stamped with the cache outcome.
fn cached_response(
    request_headers: &HeaderMap,
    response: &OverpassResponse,
    status: CacheStatus,
) -> Result<Response, ApiError> {
    let etag = weak_etag(response).map_err(|_| ApiError::internal())?;
    let if_none_match = request_headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());
    if let Some(candidates) = if_none_match {
        if if_none_match_matches(candidates, &etag) {
            return http::Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(ETAG, etag.as_str())
                .body(Body::empty())
                .map_err(|_| ApiError::internal());
        }
    }
    let body = serde_json::to_vec(response).map_err(|_| ApiError::internal())?;
    http::Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(ETAG, etag.as_str())
        .header(CACHE_STATUS_HEADER, status.as_str())
        .body(Body::from(body))
        .map_err(|_| ApiError::internal())
}

async fn passthrough(State(state): State<AppState>, request: Request) -> Response {
    match handle_passthrough(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn handle_passthrough(state: &AppState, request: Request) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::bad_request("Unreadable request body"))?;
    forward(state, &parts, bytes).await
}

/// Forwards the buffered request verbatim and streams the upstream
/// response back, minus transport framing headers.
async fn forward(state: &AppState, parts: &Parts, body: Bytes) -> Result<Response, ApiError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let request = ProxyRequest {
        method: parts.method.clone(),
        path_and_query,
        headers: parts.headers.clone(),
        body,
    };
    let upstream = state.forwarder.forward(request).await.map_err(|error| {
        warn!(%error, "pass-through failed");
        ApiError::bad_gateway()
    })?;

    let mut builder = http::Response::builder().status(upstream.status);
    for (name, value) in upstream.headers.iter() {
        if is_framing_header(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(upstream.body))
        .map_err(|_| ApiError::internal())
}

fn is_framing_header(name: &HeaderName) -> bool {
    name == http::header::TRANSFER_ENCODING
        || name == http::header::CONNECTION
        || name == http::header::CONTENT_LENGTH
}

/// Permissive CORS: `OPTIONS` anywhere answers 204 immediately; every
/// other response gets the allow headers appended.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_bodies_decode_to_maps() {
        let body = normalize_body(
            Some("application/x-www-form-urlencoded"),
            Bytes::from_static(b"data=%5Bout%3Ajson%5D%3B&amenity=cafe"),
        );
        match body {
            QueryBody::Form(form) => {
                assert_eq!(form.get("data").map(String::as_str), Some("[out:json];"));
                assert_eq!(form.get("amenity").map(String::as_str), Some("cafe"));
            }
            other => panic!("expected form, got {other:?}"),
        }
    }

    #[test]
    fn text_bodies_stay_text() {
        let body = normalize_body(None, Bytes::from_static(b"[out:json];node;out;"));
        match body {
            QueryBody::Text(text) => assert_eq!(text, "[out:json];node;out;"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn non_utf8_bodies_stay_raw() {
        let body = normalize_body(None, Bytes::from_static(&[0xff, 0xfe, 0x00]));
        assert!(matches!(body, QueryBody::Raw(_)));
    }

    #[test]
    fn framing_headers_are_not_forwarded() {
        assert!(is_framing_header(&http::header::TRANSFER_ENCODING));
        assert!(is_framing_header(&http::header::CONTENT_LENGTH));
        assert!(!is_framing_header(&http::header::CONTENT_TYPE));
    }
}
