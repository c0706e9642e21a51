//! The metadata record attached to each vector id.
//!
//! Recognized slots are typed; anything else round-trips opaquely through
//! `extra` so callers can carry attributes this crate doesn't interpret.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Three-valued editorial bias tag, nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    /// Left-leaning.
    Left,
    /// Neutral / unbiased.
    Neutral,
    /// Right-leaning.
    Right,
}

/// A heterogeneous attribute bag keyed by vector id.
///
/// `id` is not serialized as part of the attribute blob itself; it is the
/// JSONL line's own `id` field, attached by [`crate::storage::MetadataStore`]
/// on read/write.
///
/// `Deserialize` is hand-written rather than derived: serde's derive buffers
/// every unclaimed key into one shared collection and feeds it to each
/// `#[serde(flatten)]` field in declaration order, so two flatten fields
/// (`numeric` and `extra`) would race over the same residual keys and the
/// first one declared (`numeric`) would reject any non-numeric unknown
/// attribute. Flattening into a single `serde_json::Map` and splitting it by
/// value shape afterward sidesteps that entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataRecord {
    /// Enumerated document category, e.g. "journal" or "chart".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// ISO-8601 calendar date (`YYYY-MM-DD`), or absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Origin path or byte string the record was ingested from.
    #[serde(rename = "source", skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Short free-form tag, or absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    /// Editorial bias, or absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias: Option<Bias>,
    /// Sparse numeric attributes, e.g. `{"confidence": 0.92}`.
    #[serde(flatten)]
    pub numeric: BTreeMap<String, f64>,
    /// Anything else the caller attached; preserved but never interpreted
    /// by filter predicates.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Deserialization target: every recognized slot typed as usual, plus a
/// single flattened bag holding every key none of them claimed.
#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type", default)]
    doc_type: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(rename = "source", default)]
    source_path: Option<String>,
    #[serde(default)]
    asset_tag: Option<String>,
    #[serde(default)]
    bias: Option<Bias>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for MetadataRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawRecord::deserialize(deserializer)?;
        let mut numeric = BTreeMap::new();
        let mut extra = serde_json::Map::new();
        for (key, value) in raw.rest {
            match value.as_f64() {
                Some(n) => {
                    numeric.insert(key, n);
                }
                None => {
                    extra.insert(key, value);
                }
            }
        }
        Ok(MetadataRecord {
            doc_type: raw.doc_type,
            date: raw.date,
            source_path: raw.source_path,
            asset_tag: raw.asset_tag,
            bias: raw.bias,
            numeric,
            extra,
        })
    }
}

impl MetadataRecord {
    /// An empty record with no recognized or extra attributes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads a numeric attribute by name, checking both the typed `numeric`
    /// map and the opaque `extra` bag (for attributes supplied as raw JSON
    /// numbers the caller didn't route through `numeric`).
    #[must_use]
    pub fn numeric_attr(&self, name: &str) -> Option<f64> {
        if let Some(v) = self.numeric.get(name) {
            return Some(*v);
        }
        self.extra.get(name).and_then(serde_json::Value::as_f64)
    }
}
