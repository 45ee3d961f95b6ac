//! Geohash tile grid.
//!
//! Tiles are geohash cells: base-32 strings over the alphabet
//! `0123456789bcdefghjkmnpqrstuvwxyz`, encoding interleaved longitude and
//! latitude bisections (longitude takes the first bit). Cells of a given
//! precision partition the plane, which makes them usable as cache keys:
//! any bounding box maps to a deterministic set of covering cells.

use std::collections::HashSet;

use crate::amenity::AmenityKey;
use crate::geo::BoundingBox;

const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Highest supported cell precision (12 characters ~ 3.7 cm cells).
pub const MAX_PRECISION: usize = 12;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GridError {
    #[error("geohash precision must be between 1 and {MAX_PRECISION}, got {0}")]
    InvalidPrecision(usize),
    #[error("invalid geohash character {0:?}")]
    InvalidCharacter(char),
    #[error("empty geohash")]
    Empty,
}

/// A geohash cell together with its decoded bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub hash: String,
    pub bounds: BoundingBox,
}

/// Store key for a tile payload: `tile:<amenity>:<hash>`.
pub fn tile_key(amenity: &AmenityKey, hash: &str) -> String {
    format!("tile:{amenity}:{hash}")
}

/// Encodes a point into a geohash of the given precision.
pub fn encode(lat: f64, lon: f64, precision: usize) -> Result<String, GridError> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GridError::InvalidPrecision(precision));
    }
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;
    let mut index = 0usize;
    let mut bit = 0u8;
    while hash.len() < precision {
        if even_bit {
            let mid = (lon_lo + lon_hi) / 2.0;
            index <<= 1;
            if lon >= mid {
                index |= 1;
                lon_lo = mid;
            } else {
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            index <<= 1;
            if lat >= mid {
                index |= 1;
                lat_lo = mid;
            } else {
                lat_hi = mid;
            }
        }
        even_bit = !even_bit;
        bit += 1;
        if bit == 5 {
            hash.push(ALPHABET[index] as char);
            bit = 0;
            index = 0;
        }
    }
    Ok(hash)
}

/// Decodes a geohash back into the bounds of its cell.
pub fn decode_bounds(hash: &str) -> Result<BoundingBox, GridError> {
    if hash.is_empty() {
        return Err(GridError::Empty);
    }
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;
    for ch in hash.chars() {
        let index = ALPHABET
            .iter()
            .position(|&a| a as char == ch)
            .ok_or(GridError::InvalidCharacter(ch))?;
        for shift in (0..5).rev() {
            let bit = (index >> shift) & 1;
            if even_bit {
                let mid = (lon_lo + lon_hi) / 2.0;
                if bit == 1 {
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit == 1 {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even_bit = !even_bit;
        }
    }
    Ok(BoundingBox {
        south: lat_lo,
        west: lon_lo,
        north: lat_hi,
        east: lon_hi,
    })
}

/// Longitude/latitude bit counts at a precision. Longitude gets the extra
/// bit on odd precisions because interleaving starts with longitude.
fn bit_split(precision: usize) -> (u32, u32) {
    let total = (precision * 5) as u32;
    (total.div_ceil(2), total / 2)
}

/// Integer cell index ranges covered by a bbox at a precision.
fn cell_span(bbox: &BoundingBox, precision: usize) -> Result<(u64, u64, u64, u64), GridError> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GridError::InvalidPrecision(precision));
    }
    let (lon_bits, lat_bits) = bit_split(precision);
    let lon_cells = 1u64 << lon_bits;
    let lat_cells = 1u64 << lat_bits;
    let cell_w = 360.0 / lon_cells as f64;
    let cell_h = 180.0 / lat_cells as f64;
    let clamp = |v: f64, max: u64| -> u64 {
        if v < 0.0 {
            0
        } else {
            (v as u64).min(max - 1)
        }
    };
    let x0 = clamp(((bbox.west + 180.0) / cell_w).floor(), lon_cells);
    let x1 = clamp(((bbox.east + 180.0) / cell_w).floor(), lon_cells);
    let y0 = clamp(((bbox.south + 90.0) / cell_h).floor(), lat_cells);
    let y1 = clamp(((bbox.north + 90.0) / cell_h).floor(), lat_cells);
    Ok((x0, x1, y0, y1))
}

/// Number of cells [`tiles_for`] would return, without materializing them.
///
/// Cheap: derived from the integer index span. Callers enforcing a tile
/// budget should check this before materializing.
pub fn tile_count(bbox: &BoundingBox, precision: usize) -> Result<u64, GridError> {
    let (x0, x1, y0, y1) = cell_span(bbox, precision)?;
    Ok((x1 - x0 + 1) * (y1 - y0 + 1))
}

/// Computes the set of geohash cells at `precision` covering `bbox`.
///
/// The result is deduplicated by hash and ordered row-major from the
/// south-west corner. A bbox smaller than one cell yields that single cell.
pub fn tiles_for(bbox: &BoundingBox, precision: usize) -> Result<Vec<Tile>, GridError> {
    let (x0, x1, y0, y1) = cell_span(bbox, precision)?;
    let (lon_bits, lat_bits) = bit_split(precision);
    let cell_w = 360.0 / (1u64 << lon_bits) as f64;
    let cell_h = 180.0 / (1u64 << lat_bits) as f64;

    let mut seen = HashSet::new();
    let mut tiles = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let lat = -90.0 + (y as f64 + 0.5) * cell_h;
            let lon = -180.0 + (x as f64 + 0.5) * cell_w;
            let hash = encode(lat, lon, precision)?;
            if seen.insert(hash.clone()) {
                let bounds = decode_bounds(&hash)?;
                tiles.push(Tile { hash, bounds });
            }
        }
    }
    Ok(tiles)
}
