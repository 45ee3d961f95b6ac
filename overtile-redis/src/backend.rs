//! Redis tile store implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::Client;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::debug;

use overtile_core::{
    AmenityKey, CachedTile, OverpassResponse, StoreError, StoreResult, Tile, TilePayload,
    TileStore, tile_key,
};

use crate::error::Error;

/// Redis-backed tile store.
///
/// Stores one JSON-serialized [`TilePayload`] per `(amenity, tile)` under
/// `tile:<amenity>:<hash>`, with a physical TTL of `cache_ttl + swr_window`
/// and a logical expiry of `cache_ttl` baked into the payload. The two
/// advisory locks live next to the payload under `:lock` (refresh,
/// TTL = swr window) and `:inflight` (miss, caller-supplied TTL), both set
/// with `NX`.
///
/// The connection is a multiplexed [`ConnectionManager`], established
/// lazily on the first operation and shared by clones.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use overtile_redis::RedisTileStore;
///
/// # fn main() -> Result<(), overtile_redis::Error> {
/// let store = RedisTileStore::builder()
///     .url("redis://redis:6379")
///     .cache_ttl(Duration::from_secs(86_400))
///     .swr_window(Duration::from_secs(8_640))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisTileStore {
    url: String,
    cache_ttl: Duration,
    swr_window: Duration,
    /// Lazy-initialized connection, established on first use.
    connection: OnceCell<ConnectionManager>,
}

impl RedisTileStore {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> RedisTileStoreBuilder {
        RedisTileStoreBuilder::default()
    }

    /// Gets or initializes the shared connection. Concurrent first calls
    /// race on a single initialization; everyone else gets the cached
    /// manager.
    async fn connection(&self) -> Result<ConnectionManager, Error> {
        self.connection
            .get_or_try_init(|| async {
                let client = Client::open(self.url.as_str())?;
                let manager = client.get_connection_manager().await?;
                Ok(manager)
            })
            .await
            .cloned()
    }

    fn payload_key(&self, amenity: &AmenityKey, tile: &Tile) -> String {
        tile_key(amenity, &tile.hash)
    }

    fn refresh_lock_key(&self, amenity: &AmenityKey, tile: &Tile) -> String {
        format!("{}:lock", tile_key(amenity, &tile.hash))
    }

    fn miss_lock_key(&self, amenity: &AmenityKey, tile: &Tile) -> String {
        format!("{}:inflight", tile_key(amenity, &tile.hash))
    }

    /// `SET key "1" PX <ttl> NX`; true when this caller took the lock.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, Error> {
        let mut connection = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .arg("NX")
            .query_async(&mut connection)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_key(&self, key: &str) -> Result<(), Error> {
        let mut connection = self.connection().await?;
        let _deleted: i64 = redis::cmd("DEL").arg(key).query_async(&mut connection).await?;
        Ok(())
    }

    fn decode(&self, tile: &Tile, raw: &str) -> Option<TilePayload> {
        match serde_json::from_str::<TilePayload>(raw) {
            Ok(payload) => Some(payload),
            Err(error) => {
                debug!(tile = %tile.hash, %error, "undecodable tile payload, treating as miss");
                None
            }
        }
    }
}

#[async_trait]
impl TileStore for RedisTileStore {
    async fn read_tiles(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
    ) -> StoreResult<HashMap<String, CachedTile>> {
        if tiles.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = tiles
            .iter()
            .map(|tile| self.payload_key(amenity, tile))
            .collect();
        let mut connection = self.connection().await.map_err(StoreError::from)?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut connection)
            .await
            .map_err(Error::from)
            .map_err(StoreError::from)?;

        let now = Utc::now();
        let mut found = HashMap::new();
        for (tile, value) in tiles.iter().zip(values) {
            if let Some(raw) = value {
                if let Some(payload) = self.decode(tile, &raw) {
                    found.insert(tile.hash.clone(), CachedTile::at(payload, now));
                }
            }
        }
        Ok(found)
    }

    async fn read_tile(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
    ) -> StoreResult<Option<CachedTile>> {
        let mut connection = self.connection().await.map_err(StoreError::from)?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.payload_key(amenity, tile))
            .query_async(&mut connection)
            .await
            .map_err(Error::from)
            .map_err(StoreError::from)?;
        Ok(value
            .and_then(|raw| self.decode(tile, &raw))
            .map(|payload| CachedTile::at(payload, Utc::now())))
    }

    async fn write_tiles(
        &self,
        amenity: &AmenityKey,
        entries: Vec<(Tile, OverpassResponse)>,
    ) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let physical_ttl_ms = (self.cache_ttl + self.swr_window).as_millis() as u64;
        let mut pipe = redis::pipe();
        for (tile, response) in entries {
            let payload = TilePayload::fresh(response, self.cache_ttl.as_secs());
            let serialized = serde_json::to_string(&payload)?;
            pipe.cmd("SET")
                .arg(self.payload_key(amenity, &tile))
                .arg(serialized)
                .arg("PX")
                .arg(physical_ttl_ms)
                .ignore();
        }
        let mut connection = self.connection().await.map_err(StoreError::from)?;
        let _: () = pipe
            .query_async(&mut connection)
            .await
            .map_err(Error::from)
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn acquire_refresh_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<bool> {
        self.acquire_lock(&self.refresh_lock_key(amenity, tile), self.swr_window)
            .await
            .map_err(StoreError::from)
    }

    async fn release_refresh_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<()> {
        self.delete_key(&self.refresh_lock_key(amenity, tile))
            .await
            .map_err(StoreError::from)
    }

    async fn acquire_miss_lock(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.acquire_lock(&self.miss_lock_key(amenity, tile), ttl)
            .await
            .map_err(StoreError::from)
    }

    async fn release_miss_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<()> {
        self.delete_key(&self.miss_lock_key(amenity, tile))
            .await
            .map_err(StoreError::from)
    }
}

/// Builder for [`RedisTileStore`].
pub struct RedisTileStoreBuilder {
    url: Option<String>,
    cache_ttl: Duration,
    swr_window: Duration,
}

impl Default for RedisTileStoreBuilder {
    fn default() -> Self {
        Self {
            url: None,
            cache_ttl: Duration::from_secs(86_400),
            swr_window: Duration::from_secs(8_640),
        }
    }
}

impl RedisTileStoreBuilder {
    /// Redis connection URL, e.g. `redis://redis:6379`. Required.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Logical freshness window. A payload older than this is stale.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Stale-while-revalidate window: how long a stale payload stays
    /// physically retained and servable. Also the refresh lock TTL.
    pub fn swr_window(mut self, window: Duration) -> Self {
        self.swr_window = window;
        self
    }

    /// Builds the store. The connection itself is established lazily on
    /// the first operation, so this never touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingUrl`] when no URL was configured.
    pub fn build(self) -> Result<RedisTileStore, Error> {
        let url = self.url.ok_or(Error::MissingUrl)?;
        Ok(RedisTileStore {
            url,
            cache_ttl: self.cache_ttl,
            swr_window: self.swr_window,
            connection: OnceCell::new(),
        })
    }
}
