//! Row-to-Feature projection.
//!
//! Maps stored rows to the external GeoJSON Feature form: the rendered
//! geometry passes through as-is, the stored tag map becomes the property
//! map with `id`, `createdate`, `lastupdate`, centroid `lon`/`lat`, and the
//! optional `distance` injected. The reserved `secret` tag is always
//! stripped. A geometry-only mode returns just geometry and id.

use oedb_db::EventRow;
use serde_json::{json, Map, Value};

/// Project one row as a GeoJSON Feature.
pub fn feature(row: &EventRow, geom_only: bool) -> Value {
    let geometry = row
        .geometry
        .as_deref()
        .and_then(|g| serde_json::from_str::<Value>(g).ok())
        .unwrap_or(Value::Null);

    if geom_only {
        return json!({
            "type": "Feature",
            "geometry": geometry,
            "properties": { "id": row.events_id },
        });
    }

    let mut properties = match &row.events_tags {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    // Never expose the mutation secret.
    properties.remove("secret");
    properties.insert(String::from("id"), json!(row.events_id));
    properties.insert(String::from("createdate"), json!(row.createdate));
    properties.insert(String::from("lastupdate"), json!(row.lastupdate));
    properties.insert(String::from("lon"), json!(row.lon));
    properties.insert(String::from("lat"), json!(row.lat));
    if let Some(distance) = row.distance {
        properties.insert(String::from("distance"), json!(distance));
    }

    json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
    })
}

/// Wrap a row sequence as a GeoJSON `FeatureCollection` with a total count.
pub fn collection(rows: &[EventRow], geom_only: bool) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": rows.iter().map(|r| feature(r, geom_only)).collect::<Vec<_>>(),
        "count": rows.len(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn row() -> EventRow {
        EventRow {
            events_id: Uuid::new_v4(),
            events_tags: json!({
                "type": "unscheduled",
                "what": "fire.wild",
                "secret": "hunter2",
                "source": "https://example.org/feed",
            }),
            createdate: Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap(),
            lastupdate: Utc.with_ymd_and_hms(2026, 8, 7, 11, 0, 0).unwrap(),
            distance: Some(42),
            geometry: Some(String::from(r#"{"type":"Point","coordinates":[2.35,48.85]}"#)),
            lon: Some(2.35),
            lat: Some(48.85),
        }
    }

    #[test]
    fn secret_is_always_stripped() {
        let projected = feature(&row(), false);
        let properties = projected.get("properties").unwrap();
        assert!(properties.get("secret").is_none());
        assert_eq!(
            properties.get("what").and_then(Value::as_str),
            Some("fire.wild")
        );
    }

    #[test]
    fn injected_properties_are_present() {
        let source = row();
        let projected = feature(&source, false);
        let properties = projected.get("properties").unwrap();
        assert_eq!(
            properties.get("id").and_then(Value::as_str),
            Some(source.events_id.to_string().as_str())
        );
        assert!(properties.get("createdate").is_some());
        assert!(properties.get("lastupdate").is_some());
        assert_eq!(properties.get("distance").and_then(Value::as_i64), Some(42));
        assert_eq!(properties.get("lon").and_then(Value::as_f64), Some(2.35));
    }

    #[test]
    fn distance_is_omitted_when_absent() {
        let mut source = row();
        source.distance = None;
        let projected = feature(&source, false);
        assert!(projected
            .get("properties")
            .unwrap()
            .get("distance")
            .is_none());
    }

    #[test]
    fn geom_only_carries_just_geometry_and_id() {
        let projected = feature(&row(), true);
        let properties = projected.get("properties").unwrap();
        assert!(properties.get("id").is_some());
        assert!(properties.get("what").is_none());
        assert_eq!(
            projected.pointer("/geometry/type").and_then(Value::as_str),
            Some("Point")
        );
    }

    #[test]
    fn missing_geometry_projects_as_null() {
        let mut source = row();
        source.geometry = None;
        let projected = feature(&source, false);
        assert!(projected.get("geometry").unwrap().is_null());
    }

    #[test]
    fn collection_counts_features() {
        let rows = vec![row(), row()];
        let projected = collection(&rows, false);
        assert_eq!(
            projected.get("type").and_then(Value::as_str),
            Some("FeatureCollection")
        );
        assert_eq!(projected.get("count").and_then(Value::as_u64), Some(2));
        assert_eq!(
            projected.get("features").and_then(Value::as_array).map(Vec::len),
            Some(2)
        );
    }
}
