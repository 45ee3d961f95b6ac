//! The tile store abstraction.
//!
//! A [`TileStore`] persists per-`(amenity, tile)` payloads in an external
//! key/value store and exposes the two advisory locks the proxy needs:
//! a refresh lock (single-flight background revalidation) and a miss lock
//! (single-flight foreground fetch). The locks are advisory: an expired
//! lock may be re-acquired elsewhere, and the resulting duplicate fetch is
//! a correctness-preserving waste.
//!
//! [`TileStoreExt`] builds the single-flight combinators and the bounded
//! miss-wait on top of the primitives, so every backend (and every test
//! double) gets them for free.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::amenity::AmenityKey;
use crate::grid::Tile;
use crate::model::OverpassResponse;
use crate::payload::CachedTile;

/// Default TTL for the foreground miss lock.
pub const DEFAULT_MISS_LOCK_TTL: Duration = Duration::from_secs(10);

const MISS_WAIT_INITIAL: Duration = Duration::from_millis(50);
const MISS_WAIT_CAP: Duration = Duration::from_millis(400);

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failure to reach the store.
    #[error("store connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The store rejected or failed a command.
    #[error("store command error: {0}")]
    Command(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A payload could not be serialized for storage.
    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of [`TileStoreExt::with_miss_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissOutcome {
    /// This caller held the lock and ran the fetch handler.
    Fetched,
    /// Another fetcher held the lock; this caller waited it out.
    Waited,
}

/// Storage backend for tile payloads and their advisory locks.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Bulk read. Returns only found entries, keyed by tile hash; payloads
    /// that fail to decode count as misses.
    async fn read_tiles(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
    ) -> StoreResult<HashMap<String, CachedTile>>;

    /// Single-tile read.
    async fn read_tile(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<Option<CachedTile>>;

    /// Bulk write of freshly fetched responses. Writes are pipelined, not
    /// transactional: entries written before a failure stand.
    async fn write_tiles(
        &self,
        amenity: &AmenityKey,
        entries: Vec<(Tile, OverpassResponse)>,
    ) -> StoreResult<()>;

    /// Tries to take the background-refresh lock. Returns false when
    /// another refresher owns it.
    async fn acquire_refresh_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<bool>;

    async fn release_refresh_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<()>;

    /// Tries to take the foreground miss lock with the given TTL.
    async fn acquire_miss_lock(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn release_miss_lock(&self, amenity: &AmenityKey, tile: &Tile) -> StoreResult<()>;
}

/// Single-flight combinators over the [`TileStore`] primitives.
pub trait TileStoreExt: TileStore {
    /// Runs `handler` iff this caller wins the refresh lock, releasing the
    /// lock afterwards. Returns whether the handler ran. A held lock means
    /// another refresher owns this tile; the call returns without side
    /// effect.
    fn with_refresh_lock<F, Fut>(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
        handler: F,
    ) -> impl Future<Output = StoreResult<bool>> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        async move {
            if !self.acquire_refresh_lock(amenity, tile).await? {
                return Ok(false);
            }
            handler().await;
            self.release_refresh_lock(amenity, tile).await?;
            Ok(true)
        }
    }

    /// Runs `handler` iff this caller wins the miss lock; otherwise waits
    /// (bounded by `ttl`) for the tile to appear. The lock is released even
    /// when the handler fails.
    fn with_miss_lock<F, Fut, E>(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
        ttl: Duration,
        handler: F,
    ) -> impl Future<Output = Result<MissOutcome, E>> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), E>> + Send,
        E: From<StoreError> + Send,
    {
        async move {
            if self.acquire_miss_lock(amenity, tile, ttl).await? {
                let result = handler().await;
                if let Err(error) = self.release_miss_lock(amenity, tile).await {
                    tracing::warn!(tile = %tile.hash, error = %error, "failed to release miss lock");
                }
                result?;
                Ok(MissOutcome::Fetched)
            } else {
                self.await_tile(amenity, tile, ttl).await?;
                Ok(MissOutcome::Waited)
            }
        }
    }

    /// Polls for the tile with exponential backoff (50 ms doubling to
    /// 400 ms) until it appears or `wait` elapses. Returns whether the tile
    /// materialized.
    fn await_tile(
        &self,
        amenity: &AmenityKey,
        tile: &Tile,
        wait: Duration,
    ) -> impl Future<Output = StoreResult<bool>> + Send {
        async move {
            let deadline = tokio::time::Instant::now() + wait;
            let mut backoff = MISS_WAIT_INITIAL;
            loop {
                if self.read_tile(amenity, tile).await?.is_some() {
                    return Ok(true);
                }
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                tokio::time::sleep(backoff.min(deadline - now)).await;
                backoff = (backoff * 2).min(MISS_WAIT_CAP);
            }
        }
    }

    /// Acquires refresh locks for as many of `tiles` as possible, returning
    /// the locked subset.
    fn lock_group_for_refresh(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
    ) -> impl Future<Output = StoreResult<Vec<Tile>>> + Send {
        async move {
            let mut locked = Vec::new();
            for tile in tiles {
                if self.acquire_refresh_lock(amenity, tile).await? {
                    locked.push(tile.clone());
                }
            }
            Ok(locked)
        }
    }

    /// Best-effort release of refresh locks; failures are logged, the locks
    /// expire on their own.
    fn release_refresh_locks(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
    ) -> impl Future<Output = ()> + Send {
        async move {
            for tile in tiles {
                if let Err(error) = self.release_refresh_lock(amenity, tile).await {
                    tracing::warn!(tile = %tile.hash, error = %error, "failed to release refresh lock");
                }
            }
        }
    }

    /// Acquires miss locks for as many of `tiles` as possible. Returns
    /// `(locked, busy)`: tiles this caller will fetch, and tiles some other
    /// fetcher is already handling.
    fn lock_group_for_miss(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
        ttl: Duration,
    ) -> impl Future<Output = StoreResult<(Vec<Tile>, Vec<Tile>)>> + Send {
        async move {
            let mut locked = Vec::new();
            let mut busy = Vec::new();
            for tile in tiles {
                if self.acquire_miss_lock(amenity, tile, ttl).await? {
                    locked.push(tile.clone());
                } else {
                    busy.push(tile.clone());
                }
            }
            Ok((locked, busy))
        }
    }

    /// Best-effort release of miss locks.
    fn release_miss_locks(
        &self,
        amenity: &AmenityKey,
        tiles: &[Tile],
    ) -> impl Future<Output = ()> + Send {
        async move {
            for tile in tiles {
                if let Err(error) = self.release_miss_lock(amenity, tile).await {
                    tracing::warn!(tile = %tile.hash, error = %error, "failed to release miss lock");
                }
            }
        }
    }
}

impl<S: TileStore + ?Sized> TileStoreExt for S {}
