//! Environment-driven configuration.
//!
//! Every knob has a default suitable for local development; values are
//! loaded once at startup with [`Config::from_env`].

use std::str::FromStr;
use std::time::Duration;

use overtile_core::grid::MAX_PRECISION;

pub const DEFAULT_UPSTREAM_URL: &str = "https://overpass-api.de/api/interpreter";
pub const DEFAULT_REDIS_URL: &str = "redis://redis:6379";

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (`PORT`).
    pub port: u16,
    /// Upstream endpoint pool (`UPSTREAM_URLS`, falling back to
    /// `UPSTREAM_URL`), comma- or whitespace-separated.
    pub upstream_urls: Vec<String>,
    /// Key/value store connection (`REDIS_URL`).
    pub redis_url: String,
    /// Logical freshness TTL (`CACHE_TTL_SECONDS`).
    pub cache_ttl: Duration,
    /// Stale window (`SWR_SECONDS`, default `max(30, ttl/10)`).
    pub swr_window: Duration,
    /// Fine tile precision (`TILE_PRECISION`).
    pub tile_precision: usize,
    /// Coarse grouping precision (`UPSTREAM_TILE_PRECISION`, default
    /// `max(2, tile - 2)`).
    pub upstream_tile_precision: usize,
    /// Tile budget per request (`MAX_TILES_PER_REQUEST`).
    pub max_tiles_per_request: u64,
    /// Cooldown after an upstream failure
    /// (`UPSTREAM_FAILURE_COOLDOWN_SECONDS`).
    pub upstream_failure_cooldown: Duration,
    /// Per-URL daily request quota (`UPSTREAM_DAILY_LIMIT`), negative
    /// disables enforcement.
    pub upstream_daily_limit: i64,
    /// Bypass the cache for every interpreter request (`TRANSPARENT_ONLY`).
    pub transparent_only: bool,
    /// Log filter directive derived from `LOG_VERBOSITY` / `LOG_LEVEL`.
    pub log_directive: String,
}

impl Config {
    pub fn from_env() -> Self {
        let cache_ttl_secs: u64 = env_parse("CACHE_TTL_SECONDS", 86_400);
        let swr_secs: u64 = env_parse("SWR_SECONDS", (cache_ttl_secs / 10).max(30));
        let tile_precision =
            env_parse::<usize>("TILE_PRECISION", 5).clamp(1, MAX_PRECISION);
        let upstream_tile_precision = env_parse(
            "UPSTREAM_TILE_PRECISION",
            tile_precision.saturating_sub(2).max(2),
        )
        .clamp(1, tile_precision);

        Self {
            port: env_parse("PORT", 8080),
            upstream_urls: split_urls(
                &std::env::var("UPSTREAM_URLS")
                    .or_else(|_| std::env::var("UPSTREAM_URL"))
                    .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            ),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            swr_window: Duration::from_secs(swr_secs),
            tile_precision,
            upstream_tile_precision,
            max_tiles_per_request: env_parse("MAX_TILES_PER_REQUEST", 1024),
            upstream_failure_cooldown: Duration::from_secs(env_parse(
                "UPSTREAM_FAILURE_COOLDOWN_SECONDS",
                60,
            )),
            upstream_daily_limit: env_parse("UPSTREAM_DAILY_LIMIT", -1),
            transparent_only: std::env::var("TRANSPARENT_ONLY")
                .map(|value| parse_bool(&value))
                .unwrap_or(false),
            log_directive: log_directive(
                std::env::var("LOG_VERBOSITY").ok().as_deref(),
                std::env::var("LOG_LEVEL").ok().as_deref(),
            ),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn split_urls(raw: &str) -> Vec<String> {
    let urls: Vec<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    if urls.is_empty() {
        vec![DEFAULT_UPSTREAM_URL.to_string()]
    } else {
        urls
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Maps `LOG_VERBOSITY` onto a tracing filter directive, with `LOG_LEVEL`
/// as the raw fallback and `info` as the final default.
fn log_directive(verbosity: Option<&str>, level: Option<&str>) -> String {
    match verbosity.map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "errors" => "error".to_string(),
        Some(v) if v == "info" => "info".to_string(),
        Some(v) if matches!(v.as_str(), "full" | "debug" | "verbose") => "debug".to_string(),
        _ => level
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "info".to_string()),
    }
}
