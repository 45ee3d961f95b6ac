//! Overtile server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use overtile::config::Config;
use overtile::dispatch::{Dispatcher, DispatcherConfig};
use overtile::refresh::RefreshManager;
use overtile::server::{AppState, router};
use overtile_core::AmenityKey;
use overtile_core::store::DEFAULT_MISS_LOCK_TTL;
use overtile_redis::RedisTileStore;
use overtile_upstream::{UpstreamClient, UpstreamPool, UpstreamProxy};

/// How long shutdown waits for in-flight background refreshes.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_tracing(&config);

    let store = RedisTileStore::builder()
        .url(&config.redis_url)
        .cache_ttl(config.cache_ttl)
        .swr_window(config.swr_window)
        .build()?;
    let pool = Arc::new(UpstreamPool::new(
        config.upstream_urls.clone(),
        config.upstream_failure_cooldown,
        config.upstream_daily_limit,
    ));
    let client = UpstreamClient::new(Arc::clone(&pool))?;
    let proxy = UpstreamProxy::new(Arc::clone(&pool))?;

    let refreshes = RefreshManager::new();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(store),
        Arc::new(client),
        refreshes.clone(),
        DispatcherConfig {
            fine_precision: config.tile_precision,
            coarse_precision: config.upstream_tile_precision,
            max_tiles_per_request: config.max_tiles_per_request,
            default_amenity: AmenityKey::default(),
            transparent_only: config.transparent_only,
            miss_lock_ttl: DEFAULT_MISS_LOCK_TTL,
            refresh_concurrency: 8,
        },
    ));
    let app = router(AppState {
        dispatcher,
        forwarder: Arc::new(proxy),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        %addr,
        upstreams = config.upstream_urls.len(),
        tile_precision = config.tile_precision,
        "starting overtile"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !refreshes.wait_all_timeout(SHUTDOWN_DRAIN_TIMEOUT).await {
        tracing::warn!("dropping unfinished background refreshes after drain timeout");
        refreshes.abort_all();
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_directive)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
