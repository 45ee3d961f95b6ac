//! Request dispatching: the cache pipeline.
//!
//! A dispatch classifies the query, decomposes its bounding box into
//! tiles, bulk-reads the store, and partitions the tiles into fresh,
//! stale, and missing. Stale tiles are served as-is while a detached
//! refresh replaces them; missing tiles block the request behind
//! per-tile miss locks so that concurrent requests cause at most one
//! upstream fetch per tile. Whatever survives is assembled into a single
//! response.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use overtile_core::{
    AmenityKey, CacheStatus, FetchError, GridError, OverpassResponse, PlannerConfig, StoreError,
    Tile, TileFetcher, TileStore, TileStoreExt,
    assemble::{clip_to_tile, combine},
    grid, inspect,
    plan::{TileFetchGroup, plan_fetch_groups},
    store::DEFAULT_MISS_LOCK_TTL,
};

use crate::refresh::RefreshManager;

/// Dispatcher tuning, derived from [`crate::Config`] in production.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub fine_precision: usize,
    pub coarse_precision: usize,
    pub max_tiles_per_request: u64,
    /// Amenity class assumed when the query and parameters name none.
    pub default_amenity: AmenityKey,
    /// Bypass the cache entirely and forward everything.
    pub transparent_only: bool,
    pub miss_lock_ttl: Duration,
    /// Cap on concurrently running refresh groups per request.
    pub refresh_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fine_precision: 5,
            coarse_precision: 3,
            max_tiles_per_request: 1024,
            default_amenity: AmenityKey::default(),
            transparent_only: false,
            miss_lock_ttl: DEFAULT_MISS_LOCK_TTL,
            refresh_concurrency: 8,
        }
    }
}

/// Outcome of dispatching one interpreter request.
#[derive(Debug)]
pub enum Dispatch {
    /// Not cacheable here; forward verbatim to the upstream.
    Proxy,
    /// Served from the tile cache.
    Cached {
        response: OverpassResponse,
        status: CacheStatus,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Query payload required")]
    MissingQuery,
    #[error("Bounding box required")]
    MissingBoundingBox,
    #[error("Request requires {0} tiles")]
    TooManyTiles(u64),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] FetchError),
}

/// Orchestrates the cache pipeline over an injected store and fetcher.
pub struct Dispatcher {
    store: Arc<dyn TileStore>,
    fetcher: Arc<dyn TileFetcher>,
    refreshes: RefreshManager,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TileStore>,
        fetcher: Arc<dyn TileFetcher>,
        refreshes: RefreshManager,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            refreshes,
            config,
        }
    }

    /// The background task registry, exposed so shutdown can drain it.
    pub fn refreshes(&self) -> &RefreshManager {
        &self.refreshes
    }

    /// Dispatches one interpreter request.
    ///
    /// `query` is the raw query text as supplied by the client;
    /// `amenity_param` is the `amenity` form/query parameter, consulted
    /// when the query itself names no amenity value.
    pub async fn dispatch(
        &self,
        query: Option<&str>,
        amenity_param: Option<&str>,
    ) -> Result<Dispatch, DispatchError> {
        if self.config.transparent_only {
            return Ok(Dispatch::Proxy);
        }
        let query = match query {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(DispatchError::MissingQuery),
        };
        if !inspect::has_json_output(query) || !inspect::has_amenity_filter(query) {
            return Ok(Dispatch::Proxy);
        }
        let bbox =
            inspect::extract_bounding_box(query).ok_or(DispatchError::MissingBoundingBox)?;
        let amenity = inspect::extract_amenity_value(query)
            .or_else(|| amenity_param.and_then(AmenityKey::new))
            .unwrap_or_else(|| self.config.default_amenity.clone());

        let tile_count = grid::tile_count(&bbox, self.config.fine_precision)?;
        if tile_count > self.config.max_tiles_per_request {
            return Err(DispatchError::TooManyTiles(tile_count));
        }
        let tiles = grid::tiles_for(&bbox, self.config.fine_precision)?;
        let cached = self.store.read_tiles(&amenity, &tiles).await?;

        let mut payloads: Vec<OverpassResponse> = Vec::new();
        let mut stale_tiles: Vec<Tile> = Vec::new();
        let mut missing_tiles: Vec<Tile> = Vec::new();
        for tile in &tiles {
            match cached.get(&tile.hash) {
                Some(entry) => {
                    if entry.stale {
                        stale_tiles.push(tile.clone());
                    }
                    payloads.push(entry.payload.response.clone());
                }
                None => missing_tiles.push(tile.clone()),
            }
        }
        let status = if !missing_tiles.is_empty() {
            CacheStatus::Miss
        } else if !stale_tiles.is_empty() {
            CacheStatus::Stale
        } else {
            CacheStatus::Hit
        };
        debug!(
            amenity = %amenity,
            tiles = tiles.len(),
            stale = stale_tiles.len(),
            missing = missing_tiles.len(),
            "dispatching cacheable request"
        );

        if !stale_tiles.is_empty() {
            self.spawn_refreshes(&amenity, stale_tiles);
        }
        if !missing_tiles.is_empty() {
            self.fetch_missing(&amenity, missing_tiles, &mut payloads)
                .await?;
        }

        let response = combine(&payloads, &bbox);
        Ok(Dispatch::Cached { response, status })
    }

    fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            coarse_precision: self.config.coarse_precision,
            fine_precision: self.config.fine_precision,
            target_tiles_per_request: None,
        }
    }

    /// Fires one detached refresh task per stale group. Concurrency is
    /// capped per originating request; tasks past the cap queue on the
    /// semaphore. In-process dedup plus the store-side refresh lock keep
    /// each tile's refresh single-flight.
    fn spawn_refreshes(&self, amenity: &AmenityKey, stale: Vec<Tile>) {
        let groups = plan_fetch_groups(stale, &self.planner());
        let semaphore = Arc::new(Semaphore::new(self.config.refresh_concurrency));
        for group in groups {
            let Some(first) = group.tiles.first() else {
                continue;
            };
            let key = format!("refresh:{amenity}:{}", first.hash);
            let store = Arc::clone(&self.store);
            let fetcher = Arc::clone(&self.fetcher);
            let amenity = amenity.clone();
            let semaphore = Arc::clone(&semaphore);
            self.refreshes.spawn_deduped(key, async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                refresh_group(store, fetcher, amenity, group).await;
            });
        }
    }

    /// Fetches missing groups synchronously. Per group: take per-tile miss
    /// locks, fetch the rectangle once, write the locked subset, wait out
    /// the busy subset, then re-read every tile. A tile still absent after
    /// that is logged and omitted from the response.
    async fn fetch_missing(
        &self,
        amenity: &AmenityKey,
        missing: Vec<Tile>,
        payloads: &mut Vec<OverpassResponse>,
    ) -> Result<(), DispatchError> {
        let groups = plan_fetch_groups(missing, &self.planner());
        for group in groups {
            let (locked, busy) = self
                .store
                .lock_group_for_miss(amenity, &group.tiles, self.config.miss_lock_ttl)
                .await?;
            if !locked.is_empty() {
                let fetched = match self.fetcher.fetch_bounds(&group.bounds, amenity).await {
                    Ok(response) => response,
                    Err(error) => {
                        self.store.release_miss_locks(amenity, &locked).await;
                        return Err(error.into());
                    }
                };
                let entries: Vec<(Tile, OverpassResponse)> = locked
                    .iter()
                    .map(|tile| (tile.clone(), clip_to_tile(&fetched, &tile.bounds)))
                    .collect();
                let written = self.store.write_tiles(amenity, entries).await;
                self.store.release_miss_locks(amenity, &locked).await;
                written?;
            }
            for tile in &busy {
                if !self
                    .store
                    .await_tile(amenity, tile, self.config.miss_lock_ttl)
                    .await?
                {
                    debug!(tile = %tile.hash, "miss wait elapsed without the tile appearing");
                }
            }
            for tile in &group.tiles {
                match self.store.read_tile(amenity, tile).await? {
                    Some(entry) => payloads.push(entry.payload.response),
                    None => warn!(
                        tile = %tile.hash,
                        amenity = %amenity,
                        "tile absent after miss fetch, omitting"
                    ),
                }
            }
        }
        Ok(())
    }
}

/// One background refresh: lock what we can, fetch the rectangle, write
/// the locked tiles. Failures are logged and dropped; the stale records
/// stay servable until their physical expiry.
async fn refresh_group(
    store: Arc<dyn TileStore>,
    fetcher: Arc<dyn TileFetcher>,
    amenity: AmenityKey,
    group: TileFetchGroup,
) {
    let locked = match store.lock_group_for_refresh(&amenity, &group.tiles).await {
        Ok(locked) => locked,
        Err(error) => {
            warn!(amenity = %amenity, %error, "refresh lock acquisition failed");
            return;
        }
    };
    if locked.is_empty() {
        debug!(amenity = %amenity, "every tile in the group is already refreshing elsewhere");
        return;
    }
    match fetcher.fetch_bounds(&group.bounds, &amenity).await {
        Ok(response) => {
            let entries: Vec<(Tile, OverpassResponse)> = locked
                .iter()
                .map(|tile| (tile.clone(), clip_to_tile(&response, &tile.bounds)))
                .collect();
            if let Err(error) = store.write_tiles(&amenity, entries).await {
                warn!(amenity = %amenity, %error, "refresh write failed");
            }
        }
        Err(error) => {
            warn!(amenity = %amenity, %error, "background refresh fetch failed");
        }
    }
    store.release_refresh_locks(&amenity, &locked).await;
}
