//! GeoJSON Feature write body and the open-ended event tag map.
//!
//! Create and update requests carry a single GeoJSON Feature:
//!
//! ```json
//! {
//!   "type": "Feature",
//!   "properties": { "type": "unscheduled", "what": "fire.wild", "when": "2026-08-07T12:00:00Z" },
//!   "geometry": { "type": "Point", "coordinates": [2.35, 48.85] }
//! }
//! ```
//!
//! The geometry is typed with the [`geojson`] crate so structurally broken
//! bodies are rejected at the serde layer; semantic validity (ring closure,
//! self-intersection, ...) is judged by the storage engine.

use serde::{Deserialize, Serialize};

/// Per-event property map.
///
/// Events carry an open-ended set of tags rather than a fixed record. Keys
/// are strings; values are arbitrary JSON scalars or arrays. The map is
/// ordered (sorted by key) so serialized output is deterministic. The
/// reserved `secret` key may be present on write and is never echoed back.
pub type TagMap = serde_json::Map<String, serde_json::Value>;

/// A GeoJSON Feature as submitted on create and update requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteBody {
    /// GeoJSON object type; must be `"Feature"` when present.
    #[serde(rename = "type")]
    pub kind: Option<String>,

    /// The event property map (`type`, `what`, `when`/`start`/`stop`,
    /// optional `secret`, and any free-form tags).
    pub properties: Option<TagMap>,

    /// The event geometry, or `null` for a geometry-less event.
    pub geometry: Option<geojson::Geometry>,
}

impl WriteBody {
    /// Look up a string-valued property, if present.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn deserializes_full_feature() {
        let body: WriteBody = serde_json::from_str(
            r#"{
                "type": "Feature",
                "properties": {"type": "unscheduled", "what": "fire.wild", "when": "2026-08-07T12:00:00Z"},
                "geometry": {"type": "Point", "coordinates": [2.35, 48.85]}
            }"#,
        )
        .unwrap();

        assert_eq!(body.kind.as_deref(), Some("Feature"));
        assert_eq!(body.property_str("what"), Some("fire.wild"));
        assert!(body.geometry.is_some());
    }

    #[test]
    fn geometry_may_be_null() {
        let body: WriteBody = serde_json::from_str(
            r#"{"type": "Feature", "properties": {"what": "x"}, "geometry": null}"#,
        )
        .unwrap();
        assert!(body.geometry.is_none());
    }

    #[test]
    fn rejects_structurally_broken_geometry() {
        let parsed: Result<WriteBody, _> = serde_json::from_str(
            r#"{"type": "Feature", "properties": {}, "geometry": {"type": "Point"}}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn non_string_property_is_not_a_str() {
        let body: WriteBody =
            serde_json::from_str(r#"{"properties": {"when": 12}, "geometry": null}"#).unwrap();
        assert_eq!(body.property_str("when"), None);
    }
}
