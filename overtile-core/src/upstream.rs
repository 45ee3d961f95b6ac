//! The upstream fetch seam.

use async_trait::async_trait;

use crate::amenity::AmenityKey;
use crate::geo::BoundingBox;
use crate::model::OverpassResponse;

/// Error from an upstream fetch, after failover inside the client.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The upstream rejected the request itself (4xx other than 429).
    /// Not a pool failure: retrying another URL would be rejected too.
    #[error("upstream rejected the request with status {0}")]
    Rejected(u16),
    /// Every configured upstream is blocked by its daily quota.
    #[error("upstream daily request limit reached")]
    DailyLimitReached,
    /// The pool ran out of candidates; carries the last attempt's failure.
    #[error("no upstream available: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// True when failing over to another upstream cannot help.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Fetches the amenity payload for a rectangle from an upstream.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch_bounds(
        &self,
        bounds: &BoundingBox,
        amenity: &AmenityKey,
    ) -> Result<OverpassResponse, FetchError>;
}
