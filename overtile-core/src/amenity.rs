//! Amenity cache namespace keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A normalized amenity class identifier, e.g. `toilets` or `drinking_water`.
///
/// Amenity keys segment the cache namespace and parameterize upstream
/// queries. Normalization is trim + lowercase; empty input yields no key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmenityKey(String);

impl AmenityKey {
    /// Normalizes `raw` into an amenity key, or `None` if nothing remains
    /// after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AmenityKey {
    /// The amenity class assumed when a query names none.
    fn default() -> Self {
        Self("toilets".to_string())
    }
}

impl fmt::Display for AmenityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(AmenityKey::new("  Drinking_Water ").unwrap().as_str(), "drinking_water");
        assert_eq!(AmenityKey::new("toilets").unwrap().as_str(), "toilets");
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(AmenityKey::new("").is_none());
        assert!(AmenityKey::new("   ").is_none());
    }
}
