//! Overpass API data model.
//!
//! Only the fields the proxy acts on are modeled; everything else an
//! upstream puts on an element (versioning meta, timestamps, users) is
//! captured in a flattened map and passed through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Element variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

/// A member entry of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMember {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A single OSM element as returned by the Overpass API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OverpassElement {
    Node {
        id: i64,
        /// Latitude. Non-numeric wire values decode to `None` and such
        /// nodes are dropped by bbox filtering instead of failing the
        /// whole payload.
        #[serde(default, deserialize_with = "lenient_coord", skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(default, deserialize_with = "lenient_coord", skip_serializing_if = "Option::is_none")]
        lon: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<BTreeMap<String, String>>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Way {
        id: i64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        nodes: Vec<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<BTreeMap<String, String>>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Relation {
        id: i64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        members: Vec<RelationMember>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<BTreeMap<String, String>>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

fn lenient_coord<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_f64))
}

impl OverpassElement {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Node { .. } => ElementKind::Node,
            Self::Way { .. } => ElementKind::Way,
            Self::Relation { .. } => ElementKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Node { id, .. } | Self::Way { id, .. } | Self::Relation { id, .. } => *id,
        }
    }

    /// Dedup identity: elements of the same kind and id are the same object.
    pub fn identity(&self) -> (ElementKind, i64) {
        (self.kind(), self.id())
    }
}

/// The Overpass response envelope. Metadata is opaque to the proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverpassResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osm3s: Option<Map<String, Value>>,
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}
