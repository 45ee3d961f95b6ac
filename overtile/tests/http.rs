//! HTTP surface behavior: routing, CORS, conditional responses, error
//! bodies, and pass-through forwarding, exercised through the router.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use tower::ServiceExt;

use common::{MockFetcher, MockStore};
use overtile::dispatch::{Dispatcher, DispatcherConfig};
use overtile::refresh::RefreshManager;
use overtile::server::{AppState, router};
use overtile_core::FetchError;
use overtile_upstream::{Forwarder, ProxiedResponse, ProxyRequest};

const SINGLE_TILE_DATA: &str = "data=%5Bout%3Ajson%5D%3Bnode%5B%22amenity%22%3D%22cafe%22%5D%2852.52%2C13.40%2C52.5201%2C13.4001%29%3Bout%3B";
const NO_JSON_DATA: &str =
    "data=node%5B%22amenity%22%3D%22cafe%22%5D%2852.5%2C13.3%2C52.6%2C13.4%29%3Bout%3B";
const NO_BBOX_DATA: &str = "data=%5Bout%3Ajson%5D%3Bnode%5B%22amenity%22%3D%22cafe%22%5D%3Bout%3B";

struct MockForwarder {
    paths: Mutex<Vec<String>>,
    failing: bool,
}

impl MockForwarder {
    fn new() -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
            failing: false,
        }
    }

    fn failing() -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    fn seen_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for MockForwarder {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxiedResponse, FetchError> {
        self.paths.lock().unwrap().push(request.path_and_query);
        if self.failing {
            return Err(FetchError::Unavailable("every upstream down".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert("x-upstream", HeaderValue::from_static("yes"));
        Ok(ProxiedResponse {
            status: StatusCode::OK,
            headers,
            body: futures::stream::once(async {
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Bytes::from_static(
                    b"upstream-body",
                ))
            })
            .boxed(),
        })
    }
}

fn app_with(forwarder: MockForwarder, config: DispatcherConfig) -> (Router, Arc<MockForwarder>) {
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(MockStore::default()),
        Arc::new(MockFetcher::new((1, 52.52005, 13.40005))),
        RefreshManager::new(),
        config,
    ));
    let forwarder = Arc::new(forwarder);
    let app = router(AppState {
        dispatcher,
        forwarder: forwarder.clone(),
    });
    (app, forwarder)
}

fn app() -> (Router, Arc<MockForwarder>) {
    app_with(MockForwarder::new(), DispatcherConfig::default())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn options_preflight_returns_204_with_cors_headers() {
    let (app, _) = app();
    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/interpreter")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn missing_query_is_a_400_with_an_error_body() {
    let (app, _) = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/interpreter")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"error": "Query payload required"})
    );
}

#[tokio::test]
async fn missing_bbox_is_a_400() {
    let (app, _) = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/interpreter?{NO_BBOX_DATA}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"error": "Bounding box required"})
    );
}

#[tokio::test]
async fn cacheable_post_misses_then_revalidates_with_etag() {
    let (app, _) = app();

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/interpreter")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(SINGLE_TILE_DATA))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(
        first.headers().get("content-type").unwrap(),
        "application/json"
    );
    let etag = first
        .headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(etag.starts_with("W/\""));
    let payload = body_json(first).await;
    assert_eq!(payload["elements"][0]["id"], 1);

    let revalidation = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/interpreter")
                .header("content-type", "application/x-www-form-urlencoded")
                .header("if-none-match", etag.as_str())
                .body(Body::from(SINGLE_TILE_DATA))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(revalidation.status(), StatusCode::NOT_MODIFIED);
    assert!(revalidation.headers().get("x-cache").is_none());
    let bytes = to_bytes(revalidation.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());

    let warm = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/interpreter")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(SINGLE_TILE_DATA))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(warm.status(), StatusCode::OK);
    assert_eq!(warm.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(warm.headers().get("etag").unwrap().to_str().unwrap(), etag);
}

#[tokio::test]
async fn non_cacheable_queries_are_forwarded_verbatim() {
    let (app, forwarder) = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/interpreter?{NO_JSON_DATA}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
    assert!(response.headers().get("x-cache").is_none());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"upstream-body");
    assert_eq!(
        forwarder.seen_paths(),
        vec![format!("/api/interpreter?{NO_JSON_DATA}")]
    );
}

#[tokio::test]
async fn other_api_endpoints_pass_through() {
    let (app, forwarder) = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(forwarder.seen_paths(), vec!["/api/status".to_string()]);
}

#[tokio::test]
async fn exhausted_upstreams_surface_as_502_on_pass_through() {
    let (app, _) = app_with(MockForwarder::failing(), DispatcherConfig::default());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"error": "Upstream error"})
    );
}

#[tokio::test]
async fn oversized_requests_get_a_413_with_the_tile_count() {
    let (app, _) = app_with(
        MockForwarder::new(),
        DispatcherConfig {
            max_tiles_per_request: 4,
            ..DispatcherConfig::default()
        },
    );
    let data = "data=%5Bout%3Ajson%5D%3Bnode%5B%22amenity%22%3D%22cafe%22%5D%280.0%2C0.0%2C10.0%2C10.0%29%3Bout%3B";
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/interpreter?{data}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let payload = body_json(response).await;
    let message = payload["error"].as_str().unwrap();
    assert!(message.starts_with("Request requires "));
    assert!(message.ends_with(" tiles"));
}

#[tokio::test]
async fn cors_headers_ride_on_every_response() {
    let (app, _) = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/interpreter")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}
