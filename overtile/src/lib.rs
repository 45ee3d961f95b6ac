//! Overtile: a caching reverse proxy for the Overpass API.
//!
//! Spatially bounded, JSON-formatted amenity queries are decomposed into
//! geohash tiles, cached per tile with TTL + stale-while-revalidate
//! semantics, and reassembled locally; every other request passes through
//! to the upstream pool verbatim.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod limiter;
pub mod refresh;
pub mod server;

pub use config::Config;
pub use dispatch::{Dispatch, DispatchError, Dispatcher, DispatcherConfig};
pub use error::ApiError;
pub use refresh::RefreshManager;
pub use server::{AppState, router};
