//! Upstream fetch planning.
//!
//! Issuing one upstream request per fine tile is dominated by per-request
//! cost, so tiles that need fetching are grouped into larger rectangles.
//! Grouping is bounded: a group never grows its union area beyond the
//! target multiple of a member tile, so sparse tiles don't snowball into
//! pathological over-fetch rectangles.

use std::collections::BTreeMap;

use crate::geo::BoundingBox;
use crate::grid::Tile;

/// A planned upstream request: one rectangle covering a set of fine tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFetchGroup {
    /// Union of the member tiles' bounds.
    pub bounds: BoundingBox,
    pub tiles: Vec<Tile>,
}

/// Planner parameters.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Prefix length used to bucket near-neighbor tiles.
    pub coarse_precision: usize,
    /// Precision of the tiles being planned.
    pub fine_precision: usize,
    /// Maximum tiles per group. Derived from the precision gap when unset.
    pub target_tiles_per_request: Option<usize>,
}

impl PlannerConfig {
    /// Effective group size target.
    ///
    /// The default reflects geohash's branching factor of 32 per precision
    /// step: an eighth of the coarse cell's fine-tile population, clamped
    /// to [8, 256].
    pub fn target(&self) -> usize {
        if let Some(target) = self.target_tiles_per_request {
            return target.max(1);
        }
        let steps = self.fine_precision.saturating_sub(self.coarse_precision) as u32;
        let population = 32u64.saturating_pow(steps);
        (population / 8).clamp(8, 256) as usize
    }
}

/// Groups fine tiles into upstream fetch rectangles.
///
/// Tiles are bucketed by coarse hash prefix, traversed in Z-order within
/// each bucket (lexicographic hash order), and cut into runs when the run
/// reaches the target size or its union area would exceed
/// `target x max member tile area`. Groups come back sorted by
/// `(south, west, north, east)`.
pub fn plan_fetch_groups(tiles: Vec<Tile>, config: &PlannerConfig) -> Vec<TileFetchGroup> {
    let target = config.target();
    let mut buckets: BTreeMap<String, Vec<Tile>> = BTreeMap::new();
    for tile in tiles {
        let prefix_len = config.coarse_precision.min(tile.hash.len());
        let prefix = tile.hash[..prefix_len].to_string();
        buckets.entry(prefix).or_default().push(tile);
    }

    let mut groups = Vec::new();
    for (_, mut bucket) in buckets {
        bucket.sort_by(|a, b| a.hash.cmp(&b.hash));
        let mut current: Vec<Tile> = Vec::new();
        let mut union: Option<BoundingBox> = None;
        let mut max_tile_area = 0.0_f64;
        for tile in bucket {
            if let Some(bounds) = union {
                let grown = bounds.union(&tile.bounds);
                let overflow = current.len() >= target
                    || grown.area() > target as f64 * max_tile_area;
                if overflow {
                    groups.push(TileFetchGroup {
                        bounds,
                        tiles: std::mem::take(&mut current),
                    });
                    union = None;
                    max_tile_area = 0.0;
                }
            }
            max_tile_area = max_tile_area.max(tile.bounds.area());
            union = Some(match union {
                Some(bounds) => bounds.union(&tile.bounds),
                None => tile.bounds,
            });
            current.push(tile);
        }
        if let Some(bounds) = union {
            groups.push(TileFetchGroup {
                bounds,
                tiles: current,
            });
        }
    }

    groups.sort_by(|a, b| {
        (a.bounds.south, a.bounds.west, a.bounds.north, a.bounds.east)
            .partial_cmp(&(b.bounds.south, b.bounds.west, b.bounds.north, b.bounds.east))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    groups
}
