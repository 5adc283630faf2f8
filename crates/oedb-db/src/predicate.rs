//! Typed search predicate construction and SQL compilation.
//!
//! Search requests arrive as a flat string parameter map. [`SearchPredicate`]
//! is the typed intermediate form: one optional spatial filter, one temporal
//! overlap range, tag/type terms, a geometry render mode, and a row cap.
//! [`SearchPredicate::compile`] lowers it to a single `PostgreSQL` statement
//! through [`sqlx::QueryBuilder`].
//!
//! Every user-supplied value is attached with `push_bind`; no request text is
//! ever concatenated into the SQL. Filter fragments are program-controlled
//! constants.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use crate::error::StoreError;
use crate::temporal::{self, TimeBound, TimeRange};

/// Default row cap when `limit` is not supplied.
const DEFAULT_LIMIT: i64 = 200;

/// Default search radius in meters for `near`.
const DEFAULT_NEAR_RADIUS: f64 = 1.0;

/// Default buffer in meters around an encoded polyline.
const DEFAULT_POLYLINE_BUFFER: f64 = 1000.0;

/// Default buffer in meters around a LineString geometry body.
const DEFAULT_LINESTRING_BUFFER: f64 = 1000.0;

/// Standard encoded-polyline coordinate precision.
const DEFAULT_POLYLINE_PRECISION: i32 = 5;

/// External identity tags usable as an exact-match spatial filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalIdKey {
    /// OpenStreetMap object reference (`where:osm` tag).
    Osm,
    /// Wikidata entity reference (`where:wikidata` tag).
    Wikidata,
}

impl ExternalIdKey {
    /// The tag key this filter matches against.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Osm => "where:osm",
            Self::Wikidata => "where:wikidata",
        }
    }
}

/// The single active spatial filter of a search.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialFilter {
    /// An explicit GeoJSON geometry body, optionally buffered (meters).
    Geometry {
        /// The geometry serialized as GeoJSON text.
        geojson: String,
        /// Buffer radius in meters; 0 disables buffering.
        buffer: f64,
    },
    /// A bounding box, normalized to (west, south, east, north).
    Bbox {
        /// Minimum longitude.
        west: f64,
        /// Minimum latitude.
        south: f64,
        /// Maximum longitude.
        east: f64,
        /// Maximum latitude.
        north: f64,
    },
    /// A point with a radius in meters.
    Near {
        /// Longitude of the reference point.
        lon: f64,
        /// Latitude of the reference point.
        lat: f64,
        /// Search radius in meters.
        radius: f64,
    },
    /// An encoded polyline with a buffer.
    Polyline {
        /// The encoded polyline string.
        encoded: String,
        /// Buffer radius in meters.
        buffer: f64,
        /// Coordinate rescale factor compensating for the engine decoding
        /// at standard precision regardless of the requested one.
        scale: f64,
    },
    /// Exact match on an external identity tag.
    ExternalId {
        /// Which external identity tag to match.
        key: ExternalIdKey,
        /// The required tag value.
        value: String,
    },
}

impl SpatialFilter {
    /// Whether this filter is point/line-based and therefore yields a
    /// per-row distance projection.
    pub const fn measures_distance(&self) -> bool {
        matches!(
            self,
            Self::Geometry { .. } | Self::Near { .. } | Self::Polyline { .. }
        )
    }
}

/// Geometry rendering mode for search results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeomMode {
    /// Render the stored centroid (default).
    Centroid,
    /// Render the full stored geometry.
    Full,
    /// Return only geometry and event id per feature.
    Only,
    /// Render the geometry generalized to a grid of the given size.
    Grid(f64),
}

/// A fully composed search predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPredicate {
    /// At most one spatial filter.
    pub spatial: Option<SpatialFilter>,
    /// Events must have a validity interval overlapping this range.
    pub valid_during: TimeRange,
    /// Prefix filter on the dotted `what` tag.
    pub what: Option<String>,
    /// Exact filter on the event category.
    pub event_type: Option<String>,
    /// Row cap.
    pub limit: i64,
    /// Geometry rendering mode.
    pub geom_mode: GeomMode,
}

impl SearchPredicate {
    /// Build a predicate from a request parameter map, relative to now.
    ///
    /// `body_geometry` is the explicit search geometry of a search-by-body
    /// request; it takes precedence over every query-string spatial filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedQuery`] when a numeric parameter
    /// (`bbox`, `near`, `buffer`, `polyline_precision`, `limit`, grid size)
    /// cannot be parsed.
    pub fn from_params(
        params: &BTreeMap<String, String>,
        body_geometry: Option<&geojson::Geometry>,
    ) -> Result<Self, StoreError> {
        Self::from_params_at(params, body_geometry, Utc::now())
    }

    /// [`SearchPredicate::from_params`] with an explicit reference instant,
    /// so relative tokens resolve deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedQuery`] on unparsable numeric
    /// parameters.
    pub fn from_params_at(
        params: &BTreeMap<String, String>,
        body_geometry: Option<&geojson::Geometry>,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let spatial = spatial_filter(params, body_geometry)?;

        let valid_during = match params.get("when") {
            Some(when) => temporal::resolve_at(when, now),
            None => temporal::range_between_at(
                params.get("start").map(String::as_str),
                params.get("stop").map(String::as_str),
                now,
            ),
        };

        let limit = match params.get("limit") {
            Some(raw) => {
                let parsed: i64 = raw
                    .parse()
                    .map_err(|_| malformed("limit", raw))?;
                if parsed < 0 {
                    return Err(malformed("limit", raw));
                }
                parsed
            }
            None => DEFAULT_LIMIT,
        };

        let geom_mode = match params.get("geom").map(String::as_str) {
            None => GeomMode::Centroid,
            Some("full") => GeomMode::Full,
            Some("only") => GeomMode::Only,
            Some(raw) => GeomMode::Grid(raw.parse().map_err(|_| malformed("geom", raw))?),
        };

        Ok(Self {
            spatial,
            valid_during,
            what: params.get("what").cloned(),
            event_type: params.get("type").cloned(),
            limit,
            geom_mode,
        })
    }

    /// Whether the compiled query carries a distance projection.
    pub fn measures_distance(&self) -> bool {
        self.spatial
            .as_ref()
            .is_some_and(SpatialFilter::measures_distance)
    }

    /// Lower the predicate to one parameterized `SELECT`.
    ///
    /// Row shape: `events_id`, `events_tags`, `createdate`, `lastupdate`,
    /// `distance` (integer or NULL), `geometry` (GeoJSON text or NULL),
    /// `lon`, `lat` (centroid, NULL for geometry-less events).
    pub fn compile(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb: QueryBuilder<'static, Postgres> =
            QueryBuilder::new("SELECT events_id, events_tags, createdate, lastupdate, ");

        match &self.spatial {
            Some(filter) if filter.measures_distance() => {
                push_distance(&mut qb, filter);
                qb.push(" AS distance, ");
            }
            _ => {
                qb.push("NULL::integer AS distance, ");
            }
        }

        match self.geom_mode {
            // "only" strips properties, it does not switch the rendering.
            GeomMode::Centroid | GeomMode::Only => {
                qb.push("ST_AsGeoJSON(geom_center) AS geometry, ");
            }
            GeomMode::Full => {
                qb.push("ST_AsGeoJSON(geom) AS geometry, ");
            }
            GeomMode::Grid(size) => {
                qb.push("ST_AsGeoJSON(ST_SnapToGrid(geom, ");
                qb.push_bind(size);
                qb.push(")) AS geometry, ");
            }
        }

        qb.push(
            "ST_X(geom_center) AS lon, ST_Y(geom_center) AS lat \
             FROM events LEFT JOIN geo ON (hash = events_geo) \
             WHERE events_when && tstzrange(",
        );
        push_time_bound(&mut qb, &self.valid_during.start);
        qb.push(", ");
        push_time_bound(&mut qb, &self.valid_during.stop);
        qb.push(", '[]')");

        if let Some(what) = &self.what {
            // The short prefix narrows via the text-pattern index; the full
            // prefix keeps only true matches. Every string matching the full
            // prefix also matches its own 4-char prefix, so the pre-filter
            // never rejects a legitimate row.
            let short: String = what.chars().take(4).collect();
            qb.push(" AND events_what LIKE ");
            qb.push_bind(format!("{short}%"));
            qb.push(" AND events_what LIKE ");
            qb.push_bind(format!("{what}%"));
        }

        if let Some(event_type) = &self.event_type {
            qb.push(" AND events_type = ");
            qb.push_bind(event_type.clone());
        }

        if let Some(filter) = &self.spatial {
            push_spatial_filter(&mut qb, filter);
        }

        qb.push(" ORDER BY ");
        if self.measures_distance() {
            qb.push("distance ASC, ");
        }
        qb.push("createdate DESC LIMIT ");
        qb.push_bind(self.limit);

        qb
    }
}

/// Select the active spatial filter, honoring the precedence order:
/// geometry body, `bbox`, `near`, `polyline`, `where:osm`, `where:wikidata`.
fn spatial_filter(
    params: &BTreeMap<String, String>,
    body_geometry: Option<&geojson::Geometry>,
) -> Result<Option<SpatialFilter>, StoreError> {
    if let Some(geometry) = body_geometry {
        let default_buffer = if matches!(geometry.value, geojson::Value::LineString(_)) {
            DEFAULT_LINESTRING_BUFFER
        } else {
            0.0
        };
        let buffer = parse_opt_f64(params, "buffer")?.unwrap_or(default_buffer);
        let geojson = serde_json::to_string(geometry)
            .map_err(|e| StoreError::MalformedQuery(format!("unencodable geometry: {e}")))?;
        return Ok(Some(SpatialFilter::Geometry { geojson, buffer }));
    }

    if let Some(raw) = params.get("bbox") {
        let corners = parse_f64_list(raw, "bbox")?;
        if let [x1, y1, x2, y2] = corners.as_slice() {
            // Accepted as two opposite corners in any order; normalized so
            // both the documented (E,S,W,N) form and the conventional
            // (W,S,E,N) form denote the same box.
            return Ok(Some(SpatialFilter::Bbox {
                west: x1.min(*x2),
                south: y1.min(*y2),
                east: x1.max(*x2),
                north: y1.max(*y2),
            }));
        }
        return Err(malformed("bbox", raw));
    }

    if let Some(raw) = params.get("near") {
        let numbers = parse_f64_list(raw, "near")?;
        return match numbers.as_slice() {
            [lon, lat] => Ok(Some(SpatialFilter::Near {
                lon: *lon,
                lat: *lat,
                radius: DEFAULT_NEAR_RADIUS,
            })),
            [lon, lat, radius] => Ok(Some(SpatialFilter::Near {
                lon: *lon,
                lat: *lat,
                radius: *radius,
            })),
            _ => Err(malformed("near", raw)),
        };
    }

    if let Some(encoded) = params.get("polyline") {
        let buffer = parse_opt_f64(params, "buffer")?.unwrap_or(DEFAULT_POLYLINE_BUFFER);
        let precision = match params.get("polyline_precision") {
            Some(raw) => raw
                .parse::<i32>()
                .map_err(|_| malformed("polyline_precision", raw))?,
            None => DEFAULT_POLYLINE_PRECISION,
        };
        // The engine decodes at standard precision whatever precision it is
        // given, so rescale the decoded coordinates afterwards.
        let scale = 10f64.powi(DEFAULT_POLYLINE_PRECISION.saturating_sub(precision));
        return Ok(Some(SpatialFilter::Polyline {
            encoded: encoded.clone(),
            buffer,
            scale,
        }));
    }

    for key in [ExternalIdKey::Osm, ExternalIdKey::Wikidata] {
        if let Some(value) = params.get(key.tag()) {
            return Ok(Some(SpatialFilter::ExternalId {
                key,
                value: value.clone(),
            }));
        }
    }

    Ok(None)
}

/// Append the spatial reference geometry expression shared by the filter
/// and distance projections.
fn push_reference_geometry(qb: &mut QueryBuilder<'static, Postgres>, filter: &SpatialFilter) {
    match filter {
        SpatialFilter::Geometry { geojson, .. } => {
            qb.push("ST_SetSRID(ST_GeomFromGeoJSON(");
            qb.push_bind(geojson.clone());
            qb.push("), 4326)");
        }
        SpatialFilter::Near { lon, lat, .. } => {
            qb.push("ST_SetSRID(ST_MakePoint(");
            qb.push_bind(*lon);
            qb.push(", ");
            qb.push_bind(*lat);
            qb.push("), 4326)");
        }
        SpatialFilter::Polyline { encoded, scale, .. } => {
            qb.push("ST_Scale(ST_LineFromEncodedPolyline(");
            qb.push_bind(encoded.clone());
            qb.push("), ");
            qb.push_bind(*scale);
            qb.push(", ");
            qb.push_bind(*scale);
            qb.push(")");
        }
        SpatialFilter::Bbox { .. } | SpatialFilter::ExternalId { .. } => {}
    }
}

fn push_distance(qb: &mut QueryBuilder<'static, Postgres>, filter: &SpatialFilter) {
    qb.push("ST_Length(ST_ShortestLine(geom, ");
    push_reference_geometry(qb, filter);
    qb.push(")::geography)::integer");
}

fn push_spatial_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &SpatialFilter) {
    match filter {
        SpatialFilter::Geometry { buffer, .. } => {
            if *buffer > 0.0 {
                qb.push(" AND ST_Intersects(geom, ST_Buffer(");
                push_reference_geometry(qb, filter);
                qb.push("::geography, ");
                qb.push_bind(*buffer);
                qb.push(")::geometry)");
            } else {
                qb.push(" AND ST_Intersects(geom, ");
                push_reference_geometry(qb, filter);
                qb.push(")");
            }
        }
        SpatialFilter::Bbox {
            west,
            south,
            east,
            north,
        } => {
            qb.push(" AND geom && ST_SetSRID(ST_MakeBox2D(ST_Point(");
            qb.push_bind(*west);
            qb.push(", ");
            qb.push_bind(*south);
            qb.push("), ST_Point(");
            qb.push_bind(*east);
            qb.push(", ");
            qb.push_bind(*north);
            qb.push(")), 4326)");
        }
        SpatialFilter::Near { radius, .. } => {
            qb.push(" AND ST_Intersects(geom, ST_Buffer(");
            push_reference_geometry(qb, filter);
            qb.push("::geography, ");
            qb.push_bind(*radius);
            qb.push(")::geometry)");
        }
        SpatialFilter::Polyline { buffer, .. } => {
            qb.push(" AND ST_Intersects(geom, ST_Buffer(");
            push_reference_geometry(qb, filter);
            qb.push("::geography, ");
            qb.push_bind(*buffer);
            qb.push(")::geometry)");
        }
        SpatialFilter::ExternalId { key, value } => {
            // Key text comes from the ExternalIdKey enum, not the request.
            qb.push(" AND events_tags ? '");
            qb.push(key.tag());
            qb.push("' AND events_tags ->> '");
            qb.push(key.tag());
            qb.push("' = ");
            qb.push_bind(value.clone());
        }
    }
}

fn push_time_bound(qb: &mut QueryBuilder<'static, Postgres>, bound: &TimeBound) {
    match bound {
        TimeBound::Instant(at) => {
            qb.push_bind(*at);
        }
        TimeBound::Literal(text) => {
            qb.push_bind(text.clone());
            qb.push("::timestamptz");
        }
    }
}

fn parse_f64_list(raw: &str, key: &str) -> Result<Vec<f64>, StoreError> {
    raw.split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| malformed(key, raw)))
        .collect()
}

fn parse_opt_f64(params: &BTreeMap<String, String>, key: &str) -> Result<Option<f64>, StoreError> {
    params
        .get(key)
        .map(|raw| raw.parse::<f64>().map_err(|_| malformed(key, raw)))
        .transpose()
}

fn malformed(key: &str, raw: &str) -> StoreError {
    StoreError::MalformedQuery(format!("unparsable '{key}' parameter: {raw}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn build(pairs: &[(&str, &str)]) -> SearchPredicate {
        SearchPredicate::from_params_at(&params(pairs), None, now()).unwrap()
    }

    #[test]
    fn defaults_apply_without_parameters() {
        let predicate = build(&[]);
        assert_eq!(predicate.limit, 200);
        assert_eq!(predicate.geom_mode, GeomMode::Centroid);
        assert!(predicate.spatial.is_none());
        assert_eq!(predicate.valid_during, TimeRange::instant(now()));
    }

    #[test]
    fn limit_zero_is_accepted_and_negative_rejected() {
        assert_eq!(build(&[("limit", "0")]).limit, 0);
        let err = SearchPredicate::from_params_at(&params(&[("limit", "-3")]), None, now());
        assert!(matches!(err, Err(StoreError::MalformedQuery(_))));
        let err = SearchPredicate::from_params_at(&params(&[("limit", "abc")]), None, now());
        assert!(matches!(err, Err(StoreError::MalformedQuery(_))));
    }

    #[test]
    fn bbox_corners_are_normalized() {
        // Documented (E,S,W,N) order: east first.
        let predicate = build(&[("bbox", "2.5,48.0,2.2,48.9")]);
        assert_eq!(
            predicate.spatial,
            Some(SpatialFilter::Bbox {
                west: 2.2,
                south: 48.0,
                east: 2.5,
                north: 48.9,
            })
        );
    }

    #[test]
    fn bbox_requires_four_numbers() {
        let err = SearchPredicate::from_params_at(&params(&[("bbox", "1,2,3")]), None, now());
        assert!(matches!(err, Err(StoreError::MalformedQuery(_))));
        let err = SearchPredicate::from_params_at(&params(&[("bbox", "1,2,x,4")]), None, now());
        assert!(matches!(err, Err(StoreError::MalformedQuery(_))));
    }

    #[test]
    fn near_radius_defaults_to_one_meter() {
        let predicate = build(&[("near", "2.35, 48.85")]);
        assert_eq!(
            predicate.spatial,
            Some(SpatialFilter::Near {
                lon: 2.35,
                lat: 48.85,
                radius: 1.0,
            })
        );
    }

    #[test]
    fn polyline_scale_compensates_precision() {
        let predicate = build(&[("polyline", "_p~iF~ps|U"), ("polyline_precision", "6")]);
        match predicate.spatial {
            Some(SpatialFilter::Polyline { buffer, scale, .. }) => {
                assert!((buffer - 1000.0).abs() < f64::EPSILON);
                assert!((scale - 0.1).abs() < f64::EPSILON);
            }
            other => panic!("expected polyline filter, got {other:?}"),
        }
    }

    #[test]
    fn spatial_precedence_prefers_bbox_over_near() {
        let predicate = build(&[("bbox", "1,2,3,4"), ("near", "2.35,48.85")]);
        assert!(matches!(predicate.spatial, Some(SpatialFilter::Bbox { .. })));
    }

    #[test]
    fn external_id_filter_is_last_resort() {
        let predicate = build(&[("where:osm", "way/123")]);
        assert_eq!(
            predicate.spatial,
            Some(SpatialFilter::ExternalId {
                key: ExternalIdKey::Osm,
                value: String::from("way/123"),
            })
        );
        assert!(!predicate.measures_distance());
    }

    #[test]
    fn geom_mode_parses_all_forms() {
        assert_eq!(build(&[("geom", "full")]).geom_mode, GeomMode::Full);
        assert_eq!(build(&[("geom", "only")]).geom_mode, GeomMode::Only);
        assert_eq!(build(&[("geom", "0.01")]).geom_mode, GeomMode::Grid(0.01));
        let err = SearchPredicate::from_params_at(&params(&[("geom", "fuzzy")]), None, now());
        assert!(matches!(err, Err(StoreError::MalformedQuery(_))));
    }

    #[test]
    fn user_text_is_bound_never_concatenated() {
        let predicate = build(&[
            ("what", "fire'; DROP TABLE events; --"),
            ("type", "unscheduled'); DELETE"),
        ]);
        let sql = predicate.compile().into_sql();
        assert!(!sql.contains("DROP"));
        assert!(!sql.contains("DELETE"));
        assert!(sql.contains("events_what LIKE $"));
    }

    #[test]
    fn near_query_orders_by_distance_then_recency() {
        let predicate = build(&[("near", "2.35,48.85,5000")]);
        let sql = predicate.compile().into_sql();
        assert!(sql.contains("ST_MakePoint"));
        assert!(sql.contains("AS distance"));
        assert!(sql.contains("ORDER BY distance ASC, createdate DESC"));
    }

    #[test]
    fn plain_query_orders_by_recency_only() {
        let predicate = build(&[]);
        let sql = predicate.compile().into_sql();
        assert!(sql.contains("NULL::integer AS distance"));
        assert!(sql.contains("ORDER BY createdate DESC"));
        assert!(sql.contains("tstzrange"));
    }

    #[test]
    fn literal_time_bounds_are_cast_in_sql() {
        let predicate = build(&[("when", "2026-08-07T12:00:00Z")]);
        let sql = predicate.compile().into_sql();
        assert!(sql.contains("::timestamptz"));
        assert!(!sql.contains("2026-08-07"));
    }

    #[test]
    fn line_string_body_gets_default_buffer() {
        let geometry = geojson::Geometry::new(geojson::Value::LineString(vec![
            vec![2.0, 48.0],
            vec![2.1, 48.1],
        ]));
        let predicate =
            SearchPredicate::from_params_at(&params(&[]), Some(&geometry), now()).unwrap();
        match predicate.spatial {
            Some(SpatialFilter::Geometry { buffer, .. }) => {
                assert!((buffer - 1000.0).abs() < f64::EPSILON);
            }
            other => panic!("expected geometry filter, got {other:?}"),
        }
    }

    #[test]
    fn point_body_defaults_to_no_buffer() {
        let geometry = geojson::Geometry::new(geojson::Value::Point(vec![2.0, 48.0]));
        let predicate =
            SearchPredicate::from_params_at(&params(&[]), Some(&geometry), now()).unwrap();
        match predicate.spatial {
            Some(SpatialFilter::Geometry { buffer, .. }) => {
                assert!(buffer.abs() < f64::EPSILON);
            }
            other => panic!("expected geometry filter, got {other:?}"),
        }
    }
}
