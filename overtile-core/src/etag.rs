//! Weak entity tags for assembled responses.

use sha1::{Digest, Sha1};

use crate::model::OverpassResponse;

/// Computes the weak entity tag `W/"<hex sha1>"` over the response's
/// canonical JSON. Object keys serialize in sorted order, so structurally
/// equal responses hash identically regardless of construction order.
pub fn weak_etag(response: &OverpassResponse) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(response)?;
    let mut hasher = Sha1::new();
    hasher.update(&canonical);
    Ok(format!("W/\"{}\"", hex::encode(hasher.finalize())))
}

/// True if any comma-separated candidate in an `If-None-Match` header value
/// equals `etag` after trimming.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| candidate == etag)
}
