//! Overpass fetch client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use overtile_core::{AmenityKey, BoundingBox, FetchError, OverpassResponse, TileFetcher};

use crate::pool::{AttemptFailure, UpstreamPool};

/// Total per-request timeout for upstream calls.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Renders the amenity-scoped Overpass QL for one fetch rectangle.
/// Double quotes in the amenity value are escaped by doubling.
pub fn overpass_query(bounds: &BoundingBox, amenity: &AmenityKey) -> String {
    let amenity = amenity.as_str().replace('"', "\"\"");
    let BoundingBox {
        south,
        west,
        north,
        east,
    } = *bounds;
    format!(
        "[out:json][timeout:120];\n\
         (\n\
         \x20 node[\"amenity\"=\"{amenity}\"]({south},{west},{north},{east});\n\
         \x20 way[\"amenity\"=\"{amenity}\"]({south},{west},{north},{east});\n\
         \x20 relation[\"amenity\"=\"{amenity}\"]({south},{west},{north},{east});\n\
         );\n\
         out body meta;\n\
         >;\n\
         out skel qt;\n"
    )
}

/// HTTP client that fetches amenity payloads through an [`UpstreamPool`].
#[derive(Clone)]
pub struct UpstreamClient {
    pool: Arc<UpstreamPool>,
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(pool: Arc<UpstreamPool>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self { pool, http })
    }

    /// Fetches the amenity payload for `bounds`, failing over across the
    /// pool. The body is parsed as an [`OverpassResponse`]; an unparsable
    /// body counts as a transient failure and rotates to the next URL.
    pub async fn fetch_bounds(
        &self,
        bounds: &BoundingBox,
        amenity: &AmenityKey,
    ) -> Result<OverpassResponse, FetchError> {
        let query = overpass_query(bounds, amenity);
        debug!(amenity = %amenity, ?bounds, "fetching tile group");
        self.pool
            .with_upstream(|url| {
                let http = self.http.clone();
                let query = query.clone();
                async move {
                    let response = http
                        .post(&url)
                        .form(&[("data", query.as_str())])
                        .send()
                        .await
                        .map_err(|error| AttemptFailure::Transient {
                            reason: error.to_string(),
                        })?;
                    let status = response.status();
                    if status.is_success() {
                        let body =
                            response
                                .bytes()
                                .await
                                .map_err(|error| AttemptFailure::Transient {
                                    reason: error.to_string(),
                                })?;
                        serde_json::from_slice(&body).map_err(|error| {
                            AttemptFailure::Transient {
                                reason: format!("invalid upstream JSON: {error}"),
                            }
                        })
                    } else if status.as_u16() == 429 || status.is_server_error() {
                        Err(AttemptFailure::Transient {
                            reason: format!("upstream status {status}"),
                        })
                    } else if status.is_client_error() {
                        Err(AttemptFailure::Rejected {
                            status: status.as_u16(),
                        })
                    } else {
                        Err(AttemptFailure::Transient {
                            reason: format!("unexpected upstream status {status}"),
                        })
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl TileFetcher for UpstreamClient {
    async fn fetch_bounds(
        &self,
        bounds: &BoundingBox,
        amenity: &AmenityKey,
    ) -> Result<OverpassResponse, FetchError> {
        UpstreamClient::fetch_bounds(self, bounds, amenity).await
    }
}
