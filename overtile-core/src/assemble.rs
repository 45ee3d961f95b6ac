//! Response assembly.
//!
//! Merges tile payloads back into a single Overpass response and, in the
//! other direction, clips a group fetch down to a single tile's bounds so
//! it can be stored per tile.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::geo::BoundingBox;
use crate::model::{OverpassElement, OverpassResponse};

/// True for nodes with numeric coordinates inside `bbox`, false for nodes
/// without usable coordinates. Ways and relations are always kept: their
/// member references stay valid even when referenced nodes are filtered,
/// and consumers tolerate dangling references.
fn element_within(element: &OverpassElement, bbox: &BoundingBox) -> bool {
    match element {
        OverpassElement::Node { lat, lon, .. } => match (lat, lon) {
            (Some(lat), Some(lon)) => bbox.contains(*lat, *lon),
            _ => false,
        },
        OverpassElement::Way { .. } | OverpassElement::Relation { .. } => true,
    }
}

/// Merges tile payloads into one response bounded by `bbox`.
///
/// The envelope comes from the first payload. Elements are deduplicated by
/// `(kind, id)` with later duplicates overwriting earlier ones; nodes
/// outside `bbox` (or without numeric coordinates) are dropped. Every
/// element in the result is cloned, so the output shares no state with the
/// inputs.
pub fn combine(payloads: &[OverpassResponse], bbox: &BoundingBox) -> OverpassResponse {
    let mut merged = match payloads.first() {
        Some(first) => OverpassResponse {
            version: first.version.clone(),
            generator: first.generator.clone(),
            osm3s: first.osm3s.clone(),
            elements: Vec::new(),
        },
        None => OverpassResponse::default(),
    };

    let mut slots: HashMap<(crate::model::ElementKind, i64), usize> = HashMap::new();
    for payload in payloads {
        for element in &payload.elements {
            if !element_within(element, bbox) {
                continue;
            }
            match slots.entry(element.identity()) {
                Entry::Occupied(entry) => merged.elements[*entry.get()] = element.clone(),
                Entry::Vacant(entry) => {
                    entry.insert(merged.elements.len());
                    merged.elements.push(element.clone());
                }
            }
        }
    }
    merged
}

/// Restricts a group fetch to one tile's bounds, for per-tile storage.
/// Applies the same node filter as [`combine`]; ways and relations land in
/// every tile of the group and collapse again at assembly time.
pub fn clip_to_tile(response: &OverpassResponse, bounds: &BoundingBox) -> OverpassResponse {
    OverpassResponse {
        version: response.version.clone(),
        generator: response.generator.clone(),
        osm3s: response.osm3s.clone(),
        elements: response
            .elements
            .iter()
            .filter(|element| element_within(element, bounds))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::HashSet;

    use serde_json::Map;

    use super::*;
    use crate::model::ElementKind;

    fn node(id: i64, lat: f64, lon: f64) -> OverpassElement {
        OverpassElement::Node {
            id,
            lat: Some(lat),
            lon: Some(lon),
            tags: None,
            extra: Map::new(),
        }
    }

    fn way(id: i64) -> OverpassElement {
        OverpassElement::Way {
            id,
            nodes: vec![1, 2],
            tags: None,
            extra: Map::new(),
        }
    }

    fn response(elements: Vec<OverpassElement>) -> OverpassResponse {
        OverpassResponse {
            elements,
            ..Default::default()
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap()
    }

    #[test]
    fn envelope_comes_from_the_first_payload() {
        let mut first = response(vec![]);
        first.generator = Some("gen-a".into());
        let mut second = response(vec![]);
        second.generator = Some("gen-b".into());
        let merged = combine(&[first, second], &bbox());
        assert_eq!(merged.generator.as_deref(), Some("gen-a"));
    }

    #[test]
    fn empty_input_yields_empty_envelope() {
        let merged = combine(&[], &bbox());
        assert_eq!(merged, OverpassResponse::default());
    }

    #[test]
    fn duplicates_collapse_with_last_writer_winning() {
        let first = response(vec![node(1, 1.0, 1.0)]);
        let mut updated = node(1, 2.0, 2.0);
        if let OverpassElement::Node { tags, .. } = &mut updated {
            *tags = Some(BTreeMap::from([("amenity".to_string(), "cafe".to_string())]));
        }
        let second = response(vec![updated.clone()]);
        let merged = combine(&[first, second], &bbox());
        assert_eq!(merged.elements.len(), 1);
        assert_eq!(merged.elements[0], updated);
    }

    #[test]
    fn identities_are_unique_after_merge() {
        let a = response(vec![node(1, 1.0, 1.0), way(1), node(2, 2.0, 2.0)]);
        let b = response(vec![node(1, 1.5, 1.5), way(1)]);
        let merged = combine(&[a, b], &bbox());
        let identities: HashSet<(ElementKind, i64)> =
            merged.elements.iter().map(|e| e.identity()).collect();
        assert_eq!(identities.len(), merged.elements.len());
        assert_eq!(identities.len(), 3);
    }

    #[test]
    fn nodes_outside_bbox_are_dropped_ways_kept() {
        let payload = response(vec![node(1, 5.0, 5.0), node(2, 20.0, 5.0), way(9)]);
        let merged = combine(&[payload], &bbox());
        let ids: Vec<i64> = merged.elements.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 9]);
    }

    #[test]
    fn nodes_without_coordinates_are_dropped() {
        let bare = OverpassElement::Node {
            id: 3,
            lat: None,
            lon: Some(5.0),
            tags: None,
            extra: Map::new(),
        };
        let merged = combine(&[response(vec![bare])], &bbox());
        assert!(merged.elements.is_empty());
    }

    #[test]
    fn combine_is_idempotent() {
        let payloads = [
            response(vec![node(1, 1.0, 1.0), node(2, 2.0, 2.0)]),
            response(vec![node(2, 2.5, 2.5), way(7)]),
        ];
        let once = combine(&payloads, &bbox());
        let twice = combine(std::slice::from_ref(&once), &bbox());
        assert_eq!(once, twice);
    }

    #[test]
    fn output_is_isolated_from_inputs() {
        let mut envelope = Map::new();
        envelope.insert("timestamp_osm_base".into(), "2024-01-01".into());
        let input = OverpassResponse {
            osm3s: Some(envelope),
            elements: vec![node(1, 1.0, 1.0)],
            ..Default::default()
        };
        let mut merged = combine(std::slice::from_ref(&input), &bbox());
        if let Some(osm3s) = merged.osm3s.as_mut() {
            osm3s.insert("mutated".into(), true.into());
        }
        if let Some(OverpassElement::Node { lat, .. }) = merged.elements.first_mut() {
            *lat = Some(9.9);
        }
        assert!(input.osm3s.as_ref().unwrap().get("mutated").is_none());
        match &input.elements[0] {
            OverpassElement::Node { lat, .. } => assert_eq!(*lat, Some(1.0)),
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn clip_keeps_contained_nodes_and_all_ways() {
        let tile_bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let fetched = response(vec![node(1, 0.5, 0.5), node(2, 5.0, 5.0), way(3)]);
        let clipped = clip_to_tile(&fetched, &tile_bounds);
        let ids: Vec<i64> = clipped.elements.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
