//! Geographic primitives.

use serde::{Deserialize, Serialize};

/// Error raised when a bounding box violates its invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GeoError {
    /// One of the coordinates is NaN or infinite.
    #[error("bounding box coordinates must be finite")]
    NonFinite,
    /// `south > north` or `west > east`.
    ///
    /// A box whose west edge lies east of its east edge would have to wrap
    /// the antimeridian, which is not supported.
    #[error("inverted bounding box: south must not exceed north, west must not exceed east")]
    Inverted,
    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("bounding box outside geodetic range")]
    OutOfRange,
}

/// An axis-aligned rectangle in geodetic degrees.
///
/// Invariant: `south <= north` and `west <= east`, all coordinates finite
/// and within [-90, 90] x [-180, 180]. Use [`BoundingBox::new`] to construct
/// a validated box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Creates a validated bounding box from `(south, west, north, east)`.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, GeoError> {
        if ![south, west, north, east].iter().all(|c| c.is_finite()) {
            return Err(GeoError::NonFinite);
        }
        if south > north || west > east {
            return Err(GeoError::Inverted);
        }
        if south < -90.0 || north > 90.0 || west < -180.0 || east > 180.0 {
            return Err(GeoError::OutOfRange);
        }
        Ok(Self {
            south,
            west,
            north,
            east,
        })
    }

    /// True if the point lies inside the box, edges included.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// The smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            south: self.south.min(other.south),
            west: self.west.min(other.west),
            north: self.north.max(other.north),
            east: self.east.max(other.east),
        }
    }

    /// Area in square degrees.
    pub fn area(&self) -> f64 {
        (self.north - self.south) * (self.east - self.west)
    }
}
