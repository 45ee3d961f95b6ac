//! # overtile-core
//!
//! Core types and traits for the Overtile tile-caching proxy.
//!
//! This crate holds everything that is independent of a concrete store or
//! HTTP client: the geographic primitives ([`BoundingBox`], [`Tile`], the
//! geohash grid), the Overpass data model, query inspection, the fetch
//! planner, the response assembler, entity tags, and the [`TileStore`] /
//! [`TileFetcher`] traits that backends implement.

pub mod amenity;
pub mod assemble;
pub mod etag;
pub mod geo;
pub mod grid;
pub mod inspect;
pub mod model;
pub mod payload;
pub mod plan;
pub mod store;
pub mod upstream;

pub use amenity::AmenityKey;
pub use geo::{BoundingBox, GeoError};
pub use grid::{GridError, Tile, tile_key, tiles_for};
pub use model::{ElementKind, OverpassElement, OverpassResponse, RelationMember};
pub use payload::{CacheStatus, CachedTile, TilePayload};
pub use plan::{PlannerConfig, TileFetchGroup, plan_fetch_groups};
pub use store::{MissOutcome, StoreError, StoreResult, TileStore, TileStoreExt};
pub use upstream::{FetchError, TileFetcher};
