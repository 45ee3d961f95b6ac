//! Query inspection.
//!
//! Classifies raw Overpass QL text without parsing it: does it ask for JSON
//! output, does it filter by amenity, which amenity value, and which
//! bounding box. Detection is pattern-based and deliberately shallow; a
//! query that fails classification is simply not cacheable and passes
//! through to the upstream.

use std::sync::LazyLock;

use regex::Regex;

use crate::amenity::AmenityKey;
use crate::geo::BoundingBox;

static OUT_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)out\s*:\s*json").expect("static pattern"));

static AMENITY_FILTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[\s*["']?amenity"#).expect("static pattern"));

static AMENITY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[\s*["']?amenity["']?\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\]\s"']+))"#)
        .expect("static pattern")
});

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("static pattern"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(//|--|#).*$").expect("static pattern"));

static BBOX_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*bbox\s*:\s*([^\]]*)\]").expect("static pattern"));

static PAREN_TUPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]*)\)").expect("static pattern"));

/// True iff the query requests JSON output (`out:json`, whitespace and case
/// tolerated). Matches anywhere in the text, comments included.
pub fn has_json_output(query: &str) -> bool {
    OUT_JSON.is_match(query)
}

/// True iff the query contains an `[amenity…` predicate, with single,
/// double, or no quoting around the key.
pub fn has_amenity_filter(query: &str) -> bool {
    AMENITY_FILTER.is_match(query)
}

/// Removes `/* */`, `//`, `--`, and `#` comments.
fn strip_comments(query: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(query, " ");
    LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

/// Extracts the amenity value from the first `["amenity"="<value>"]`
/// predicate, accepting single, double, or bare-word quoting. Comments are
/// stripped first; empty values yield `None`.
pub fn extract_amenity_value(query: &str) -> Option<AmenityKey> {
    let stripped = strip_comments(query);
    let captures = AMENITY_VALUE.captures(&stripped)?;
    let raw = captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))?
        .as_str();
    AmenityKey::new(raw)
}

/// Extracts the query's bounding box.
///
/// After comment stripping, a `[bbox:<s>,<w>,<n>,<e>]` directive wins;
/// otherwise the first parenthesized tuple of exactly four numbers does.
/// Tuples with any other arity, non-numeric members, or an invalid
/// south/west/north/east ordering are skipped.
pub fn extract_bounding_box(query: &str) -> Option<BoundingBox> {
    let stripped = strip_comments(query);
    if let Some(captures) = BBOX_DIRECTIVE.captures(&stripped) {
        if let Some(bbox) = parse_four_numbers(&captures[1]) {
            return Some(bbox);
        }
    }
    for captures in PAREN_TUPLE.captures_iter(&stripped) {
        if let Some(bbox) = parse_four_numbers(&captures[1]) {
            return Some(bbox);
        }
    }
    None
}

fn parse_four_numbers(raw: &str) -> Option<BoundingBox> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return None;
    }
    let mut numbers = [0.0_f64; 4];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    BoundingBox::new(numbers[0], numbers[1], numbers[2], numbers[3]).ok()
}
