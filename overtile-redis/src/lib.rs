//! Redis-backed [`TileStore`](overtile_core::TileStore) implementation.

pub mod backend;
pub mod error;

pub use crate::backend::{RedisTileStore, RedisTileStoreBuilder};
pub use crate::error::Error;
