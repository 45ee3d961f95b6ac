//! Cached tile payloads and cache outcome reporting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::OverpassResponse;

/// The stored value for one `(amenity, tile)` pair.
///
/// `fetched_at <= expires_at` always holds. Between `expires_at` and the
/// store's physical expiry the record is stale: still served, while a
/// background refresh may replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePayload {
    pub response: OverpassResponse,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TilePayload {
    /// Wraps a freshly fetched response, valid for `ttl_secs` from now.
    pub fn fresh(response: OverpassResponse, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            response,
            fetched_at: now,
            expires_at: now + Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A payload read back from the store, with staleness evaluated at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    pub payload: TilePayload,
    pub stale: bool,
}

impl CachedTile {
    pub fn at(payload: TilePayload, now: DateTime<Utc>) -> Self {
        let stale = payload.is_stale(now);
        Self { payload, stale }
    }
}

/// Cache outcome for a served request, rendered into the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Every tile was present and fresh.
    Hit,
    /// Every tile was present, at least one logically expired.
    Stale,
    /// At least one tile had to be fetched now.
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Stale => "STALE",
            Self::Miss => "MISS",
        }
    }
}
