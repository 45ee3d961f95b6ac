//! Shared in-memory doubles for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;

use overtile_core::{
    AmenityKey, BoundingBox, CachedTile, FetchError, OverpassElement, OverpassResponse,
    StoreResult, Tile, TileFetcher, TilePayload, TileStore, tile_key,
};

/// In-memory [`TileStore`] with real lock semantics, minus TTL expiry.
#[derive(Default)]
pub struct MockStore {
    values: Mutex<HashMap<String, TilePayload>>,
    locks: Mutex<HashSet<String>>,
}

impl MockStore {
    /// Plants a logically expired payload for the tile.
    pub fn insert_stale(&self, amenity: &AmenityKey, tile: &Tile, response: OverpassResponse) {
        let now = Utc::now();
        self.values.lock().unwrap().insert(
            tile_key(amenity, &tile.hash),
            TilePayload {
                response,
                fetched_at: now - chrono::Duration::hours(2),
                expires_at: now - chrono::Duration::hours(1),
            },
        );
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.values.lock().unwrap().keys().cloned().collect()
    }

    pub fn payload(&self, amenity: &AmenityKey, hash: &str) -> Option<TilePayload> {
        self.values
            .lock()
            .unwrap()
            .get(&tile_key(amenity, hash))
            .cloned()
    }
}

#[async_trait]
impl TileStore for MockStore {
    async fn read_tiles(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
    ) -> StoreResult<HashMap<String, CachedTile>> {
        let values = self.values.lock().unwrap();
        let now = Utc::now();
        Ok(tiles
            .iter()
            .filter_map(|tile| {
                values
                    .get(&tile_key(amenity, &tile.hash))
                    .map(|payload| (tile.hash.clone(), CachedTile::at(payload.clone(), now)))
            })
            .collect())
    }

    async fn read_tile(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
    ) -> StoreResult<Option<CachedTile>> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(&tile_key(amenity, &tile.hash))
            .map(|payload| CachedTile::at(payload.clone(), Utc::now())))
    }

    async fn write_tiles(
        &self,
        amenity: &AmenityKey,
        entries: Vec<(Tile, OverpassResponse)>,
    ) -> StoreResult<()> {
        let mut values = self.values.lock().unwrap();
        for (tile, response) in entries {
            values.insert(
                tile_key(amenity, &tile.hash),
                TilePayload::fresh(response, 3600),
            );
        }
        Ok(())
    }

    async fn acquire_refresh_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<bool> {
        Ok(self
            .locks
            .lock()
            .unwrap()
            .insert(format!("{}:lock", tile_key(amenity, &tile.hash))))
    }

    async fn release_refresh_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<()> {
        self.locks
            .lock()
            .unwrap()
            .remove(&format!("{}:lock", tile_key(amenity, &tile.hash)));
        Ok(())
    }

    async fn acquire_miss_lock(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
        _ttl: Duration,
    ) -> StoreResult<bool> {
        Ok(self
            .locks
            .lock()
            .unwrap()
            .insert(format!("{}:inflight", tile_key(amenity, &tile.hash))))
    }

    async fn release_miss_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<()> {
        self.locks
            .lock()
            .unwrap()
            .remove(&format!("{}:inflight", tile_key(amenity, &tile.hash)));
        Ok(())
    }
}

/// Fetcher double: always answers with one node at a fixed position, so
/// fetches whose rectangle does not contain it store an empty tile.
pub struct MockFetcher {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub failing: AtomicBool,
    pub node: (i64, f64, f64),
}

impl MockFetcher {
    pub fn new(node: (i64, f64, f64)) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            node,
        }
    }

    pub fn with_delay(node: (i64, f64, f64), delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(node)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn node_at(id: i64, lat: f64, lon: f64) -> OverpassElement {
    OverpassElement::Node {
        id,
        lat: Some(lat),
        lon: Some(lon),
        tags: None,
        extra: Map::new(),
    }
}

#[async_trait]
impl TileFetcher for MockFetcher {
    async fn fetch_bounds(
        &self,
        _bounds: &BoundingBox,
        _amenity: &AmenityKey,
    ) -> Result<OverpassResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Unavailable("mock outage".to_string()));
        }
        let (id, lat, lon) = self.node;
        Ok(OverpassResponse {
            generator: Some("mock".to_string()),
            elements: vec![node_at(id, lat, lon)],
            ..Default::default()
        })
    }
}
