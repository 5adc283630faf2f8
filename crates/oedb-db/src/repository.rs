//! Event repository: search, point lookup, create, coalesce update, and
//! archive-then-delete with per-event secret authorization.
//!
//! Writes follow the request-per-transaction model: geometry resolution and
//! the event insert (or update) share one transaction, as do the retention
//! archive and the guarded delete. A write that fails authorization affects
//! zero rows; the repository then disambiguates between an idempotent
//! duplicate (reported with the existing id) and a genuine refusal.

use oedb_types::{EventId, TagMap, WriteBody};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::geometry;
use crate::predicate::SearchPredicate;

/// Point lookup by id; full geometry is always rendered.
const GET_EVENT_SQL: &str = r"
    SELECT events_id, events_tags, createdate, lastupdate,
           NULL::integer AS distance,
           ST_AsGeoJSON(geom) AS geometry,
           ST_X(geom_center) AS lon, ST_Y(geom_center) AS lat
    FROM events LEFT JOIN geo ON (hash = events_geo)
    WHERE events_id = $1";

/// Insert with the dedup index absorbing equivalent rows.
const INSERT_EVENT_SQL: &str = r"
    INSERT INTO events (events_type, events_what, events_when, events_tags, events_geo)
    VALUES ($1, $2, tstzrange($3::timestamptz, $4::timestamptz, $5), $6, $7)
    ON CONFLICT DO NOTHING
    RETURNING events_id";

/// Locate the pre-existing row that suppressed an insert.
const FIND_DUPLICATE_SQL: &str = r"
    SELECT events_id FROM events
    WHERE events_what = $1
      AND events_when = tstzrange($2::timestamptz, $3::timestamptz, $4)
      AND events_geo IS NOT DISTINCT FROM $5";

/// Coalesce update: an omitted field keeps its stored value. The validity
/// range is kept bit-for-bit when neither side is supplied; otherwise it is
/// rebuilt over the coalesced sides with closed bounds iff they are equal.
/// The body's `secret` key is stripped before the tag overlay.
const UPDATE_EVENT_SQL: &str = r"
    UPDATE events SET
        events_type = coalesce($1, events_type),
        events_what = coalesce($2, events_what),
        events_when = CASE
            WHEN $3::timestamptz IS NULL AND $4::timestamptz IS NULL THEN events_when
            ELSE tstzrange(
                coalesce($3::timestamptz, lower(events_when)),
                coalesce($4::timestamptz, upper(events_when)),
                CASE WHEN coalesce($3::timestamptz, lower(events_when))
                        = coalesce($4::timestamptz, upper(events_when))
                     THEN '[]' ELSE '[)' END)
        END,
        events_tags = events_tags || ($5::jsonb - 'secret'),
        events_geo = coalesce($6, events_geo),
        lastupdate = now()
    WHERE events_id = $7";

/// Find any row already matching the post-update state of the target row
/// (the coalesced field values). Mirrors the range computation of
/// [`UPDATE_EVENT_SQL`].
const FIND_POST_STATE_DUPLICATE_SQL: &str = r"
    WITH stored AS (SELECT * FROM events WHERE events_id = $1)
    SELECT candidate.events_id FROM events AS candidate, stored
    WHERE candidate.events_what = coalesce($2, stored.events_what)
      AND candidate.events_when = CASE
          WHEN $3::timestamptz IS NULL AND $4::timestamptz IS NULL THEN stored.events_when
          ELSE tstzrange(
              coalesce($3::timestamptz, lower(stored.events_when)),
              coalesce($4::timestamptz, upper(stored.events_when)),
              CASE WHEN coalesce($3::timestamptz, lower(stored.events_when))
                      = coalesce($4::timestamptz, upper(stored.events_when))
                   THEN '[]' ELSE '[)' END)
      END
      AND candidate.events_geo IS NOT DISTINCT FROM coalesce($5, stored.events_geo)";

/// Snapshot the full live row into the retention log.
const ARCHIVE_EVENT_SQL: &str = r"
    INSERT INTO events_deleted
    SELECT events_id, createdate, lastupdate, events_type, events_what,
           events_when, events_geo, events_tags
    FROM events WHERE events_id = $1";

const DELETE_PUBLIC_SQL: &str = r"
    DELETE FROM events
    WHERE events_id = $1 AND events_tags ->> 'secret' IS NULL";

const DELETE_WITH_SECRET_SQL: &str = r"
    DELETE FROM events
    WHERE events_id = $1
      AND (events_tags ->> 'secret' = $2 OR events_tags ->> 'secret' IS NULL)";

/// A stored event row as returned by search and point lookups.
///
/// Uses runtime types rather than compile-time checked types to avoid
/// requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Server-generated event id.
    pub events_id: Uuid,
    /// The stored property map (may contain `secret`; redacted on output).
    pub events_tags: serde_json::Value,
    /// Creation timestamp, immutable.
    pub createdate: chrono::DateTime<chrono::Utc>,
    /// Last-update timestamp, refreshed on every update.
    pub lastupdate: chrono::DateTime<chrono::Utc>,
    /// Distance in meters to the spatial reference, when one exists.
    pub distance: Option<i32>,
    /// Rendered geometry as GeoJSON text, per the requested render mode.
    pub geometry: Option<String>,
    /// Centroid longitude.
    pub lon: Option<f64>,
    /// Centroid latitude.
    pub lat: Option<f64>,
}

/// The resolution of a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new event was stored.
    Created(EventId),
    /// The target event was updated in place.
    Updated(EventId),
    /// An equivalent row already exists; nothing was written.
    Duplicate(EventId),
}

/// Aggregate statistics over the event store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSummary {
    /// Estimated total row count (planner statistics, not `count(*)`).
    pub events_count: i64,
    /// Most recent `lastupdate` across all events.
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    /// Storage engine uptime, rendered as interval text.
    pub db_uptime: Option<String>,
    /// Per-`what` summary of the most recently updated events.
    pub recent: Vec<RecentWhatSummary>,
}

/// One `what` group of the recent-events summary.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct RecentWhatSummary {
    /// The dotted `what` tag.
    pub what: String,
    /// Most recent validity end in the group (truncated ISO text).
    pub last: Option<String>,
    /// Number of events in the group.
    pub count: i64,
    /// Distinct `source` tag hosts contributing to the group.
    pub sources: Option<Vec<String>>,
}

/// Operations on the `events` table.
pub struct EventRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> EventRepository<'a> {
    /// Create a new repository bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Execute a compiled search predicate.
    ///
    /// Returns rows ordered per the predicate (distance then recency when a
    /// spatial reference exists, recency otherwise). No side effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn search(&self, predicate: &SearchPredicate) -> Result<Vec<EventRow>, StoreError> {
        let mut query = predicate.compile();
        let rows = query
            .build_query_as::<EventRow>()
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    /// Point lookup by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such event exists.
    pub async fn get(&self, id: Uuid) -> Result<EventRow, StoreError> {
        sqlx::query_as::<_, EventRow>(GET_EVENT_SQL)
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Create an event from a write body.
    ///
    /// Missing body keys are collected as warnings and logged; they block
    /// creation only when the body is effectively unusable (no properties,
    /// no `what`, no `type`, or no usable time). Geometry is resolved
    /// through the content-addressed store first, inside the same
    /// transaction as the insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an unusable body,
    /// [`StoreError::InvalidGeometry`] for a malformed geometry, or
    /// [`StoreError::Postgres`] on storage failure.
    pub async fn create(&self, body: &WriteBody) -> Result<WriteOutcome, StoreError> {
        let (draft, warnings) = EventDraft::from_body(body)?;
        for warning in &warnings {
            tracing::warn!(%warning, "incomplete create body");
        }

        let mut tx = self.pool.begin().await?;
        let geo_hash = match &draft.geometry {
            Some(geojson) => Some(geometry::resolve_or_insert(&mut tx, geojson).await?),
            None => None,
        };

        let created: Option<Uuid> = sqlx::query_scalar(INSERT_EVENT_SQL)
            .bind(&draft.event_type)
            .bind(&draft.what)
            .bind(&draft.start)
            .bind(&draft.stop)
            .bind(draft.bounds)
            .bind(&draft.tags)
            .bind(geo_hash.as_deref())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(id) = created {
            tx.commit().await?;
            tracing::info!(%id, what = draft.what, "Event created");
            return Ok(WriteOutcome::Created(id.into()));
        }

        // The dedup index absorbed the insert; report the existing row.
        let existing: Option<Uuid> = sqlx::query_scalar(FIND_DUPLICATE_SQL)
            .bind(&draft.what)
            .bind(&draft.start)
            .bind(&draft.stop)
            .bind(draft.bounds)
            .bind(geo_hash.as_deref())
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        existing
            .map(|id| WriteOutcome::Duplicate(id.into()))
            .ok_or(StoreError::Postgres(sqlx::Error::RowNotFound))
    }

    /// Apply a coalesce update to an event.
    ///
    /// The supplied secret may arrive in the body (`properties.secret`) or
    /// as a query parameter (`query_secret`); the body wins. With a stored
    /// secret present, a missing or mismatched supplied secret makes the
    /// update affect zero rows, which resolves to either
    /// [`WriteOutcome::Duplicate`] (a row already matches the desired
    /// post-update state) or [`StoreError::Unauthorized`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unauthorized`] on a refused write,
    /// [`StoreError::InvalidGeometry`] for a malformed geometry, or
    /// [`StoreError::Postgres`] on storage failure.
    pub async fn update(
        &self,
        id: Uuid,
        body: &WriteBody,
        query_secret: Option<&str>,
    ) -> Result<WriteOutcome, StoreError> {
        let patch = EventPatch::from_body(body)?;
        let supplied = patch.secret.as_deref().or(query_secret);

        let mut tx = self.pool.begin().await?;
        let geo_hash = match &patch.geometry {
            Some(geojson) => Some(geometry::resolve_or_insert(&mut tx, geojson).await?),
            None => None,
        };

        let sql = if supplied.is_some() {
            format!(
                "{UPDATE_EVENT_SQL} AND (events_tags ->> 'secret' = $8 \
                 OR events_tags ->> 'secret' IS NULL) RETURNING events_id"
            )
        } else {
            format!("{UPDATE_EVENT_SQL} AND events_tags ->> 'secret' IS NULL RETURNING events_id")
        };

        let mut query = sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(&patch.event_type)
            .bind(&patch.what)
            .bind(&patch.start)
            .bind(&patch.stop)
            .bind(&patch.tags)
            .bind(geo_hash.as_deref())
            .bind(id);
        if let Some(secret) = supplied {
            query = query.bind(secret.to_owned());
        }

        match query.fetch_optional(&mut *tx).await {
            Ok(Some(updated)) => {
                tx.commit().await?;
                tracing::info!(%updated, "Event updated");
                Ok(WriteOutcome::Updated(updated.into()))
            }
            Ok(None) => {
                tx.rollback().await?;
                match self
                    .find_post_state_duplicate(id, &patch, geo_hash.as_deref())
                    .await?
                {
                    Some(existing) => Ok(WriteOutcome::Duplicate(existing)),
                    None => Err(StoreError::Unauthorized {
                        secret_supplied: supplied.is_some(),
                    }),
                }
            }
            Err(err) => {
                let unique_violation = matches!(
                    &err,
                    sqlx::Error::Database(db) if db.is_unique_violation()
                );
                drop(tx);
                if unique_violation {
                    // Updating the row to a state another row already holds.
                    if let Some(existing) = self
                        .find_post_state_duplicate(id, &patch, geo_hash.as_deref())
                        .await?
                    {
                        return Ok(WriteOutcome::Duplicate(existing));
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Archive then delete an event, in one transaction.
    ///
    /// The full current row is archived into the retention log for any
    /// existing id; the delete itself is guarded by the secret rule. A
    /// refused delete rolls the archive back so no orphan retention record
    /// remains.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id,
    /// [`StoreError::Unauthorized`] on a refused delete, or
    /// [`StoreError::Postgres`] on storage failure.
    pub async fn remove(&self, id: Uuid, secret: Option<&str>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let archived = sqlx::query(ARCHIVE_EVENT_SQL)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted = if let Some(secret) = secret {
            sqlx::query(DELETE_WITH_SECRET_SQL)
                .bind(id)
                .bind(secret)
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query(DELETE_PUBLIC_SQL)
                .bind(id)
                .execute(&mut *tx)
                .await?
        }
        .rows_affected();

        if deleted == 1 {
            tx.commit().await?;
            tracing::info!(%id, "Event deleted and archived");
            return Ok(());
        }

        tx.rollback().await?;
        if archived == 0 {
            Err(StoreError::NotFound)
        } else {
            Err(StoreError::Unauthorized {
                secret_supplied: secret.is_some(),
            })
        }
    }

    /// Aggregate statistics: estimated row count, freshness, engine uptime,
    /// and a per-`what` summary of the most recently updated events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if any query fails.
    pub async fn stats(&self) -> Result<StatsSummary, StoreError> {
        // Planner estimate; much cheaper than count(*) on a large table.
        let events_count: Option<i64> = sqlx::query_scalar(
            "SELECT reltuples::bigint FROM pg_class WHERE relname = 'events'",
        )
        .fetch_optional(self.pool)
        .await?;

        let (last_updated, db_uptime): (
            Option<chrono::DateTime<chrono::Utc>>,
            Option<String>,
        ) = sqlx::query_as(
            r"SELECT max(lastupdate) AS last_updated,
                     (current_timestamp - pg_postmaster_start_time())::text AS db_uptime
              FROM events",
        )
        .fetch_one(self.pool)
        .await?;

        let recent = sqlx::query_as::<_, RecentWhatSummary>(
            r"SELECT events_what AS what,
                     left(max(upper(events_when))::text, 19) AS last,
                     count(*) AS count,
                     array_agg(DISTINCT regexp_replace(regexp_replace(
                         events_tags ->> 'source', '^(http://|https://)', ''), '/.*', ''))
                       FILTER (WHERE events_tags ? 'source') AS sources
              FROM (SELECT * FROM events ORDER BY lastupdate DESC LIMIT 10000) AS recent
              GROUP BY 1
              ORDER BY 2 DESC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(StatsSummary {
            events_count: events_count.unwrap_or(0),
            last_updated,
            db_uptime,
            recent,
        })
    }

    async fn find_post_state_duplicate(
        &self,
        id: Uuid,
        patch: &EventPatch,
        geo_hash: Option<&str>,
    ) -> Result<Option<EventId>, StoreError> {
        let existing: Option<Uuid> = sqlx::query_scalar(FIND_POST_STATE_DUPLICATE_SQL)
            .bind(id)
            .bind(&patch.what)
            .bind(&patch.start)
            .bind(&patch.stop)
            .bind(geo_hash)
            .fetch_optional(self.pool)
            .await?;
        Ok(existing.map(EventId::from))
    }
}

/// A validated create body, ready to bind.
#[derive(Debug, Clone)]
struct EventDraft {
    event_type: String,
    what: String,
    start: String,
    stop: String,
    bounds: &'static str,
    tags: serde_json::Value,
    geometry: Option<String>,
}

impl EventDraft {
    /// Validate a create body, collecting warnings for each missing key.
    ///
    /// Blocks only when the body is effectively unusable; otherwise the
    /// warnings accompany a usable draft.
    fn from_body(body: &WriteBody) -> Result<(Self, Vec<String>), StoreError> {
        let mut warnings = Vec::new();

        if body.kind.as_deref().is_some_and(|k| k != "Feature") {
            warnings.push(String::from("geojson must be \"type\":\"Feature\" only"));
        }

        let props = match &body.properties {
            Some(props) => props.clone(),
            None => {
                warnings.push(String::from("missing 'properties' element"));
                TagMap::new()
            }
        };

        if body.geometry.is_none() {
            warnings.push(String::from("missing 'geometry' element"));
        }

        let when = string_prop(&props, "when");
        let start = string_prop(&props, "start");
        let stop = string_prop(&props, "stop");
        if when.is_none() && (start.is_none() || stop.is_none()) {
            warnings.push(String::from("missing 'when' or 'start/stop' in properties"));
        }

        let event_type = string_prop(&props, "type");
        if event_type.is_none() {
            warnings.push(String::from("missing 'type' of event in properties"));
        }
        let what = string_prop(&props, "what");
        if what.is_none() {
            warnings.push(String::from("missing 'what' in properties"));
        }

        let start = start.or_else(|| when.clone());
        let stop = stop.or(when);

        let (Some(event_type), Some(what), Some(start), Some(stop)) =
            (event_type, what, start, stop)
        else {
            return Err(StoreError::Validation(warnings));
        };

        let bounds = if start == stop { "[]" } else { "[)" };
        let geometry = encode_geometry(body)?;

        Ok((
            Self {
                event_type,
                what,
                start,
                stop,
                bounds,
                tags: serde_json::Value::Object(props),
                geometry,
            },
            warnings,
        ))
    }
}

/// An update body: every field optional, omitted fields keep stored values.
#[derive(Debug, Clone)]
struct EventPatch {
    event_type: Option<String>,
    what: Option<String>,
    start: Option<String>,
    stop: Option<String>,
    tags: serde_json::Value,
    geometry: Option<String>,
    secret: Option<String>,
}

impl EventPatch {
    fn from_body(body: &WriteBody) -> Result<Self, StoreError> {
        let props = body.properties.clone().unwrap_or_default();
        let when = string_prop(&props, "when");
        let geometry = encode_geometry(body)?;

        Ok(Self {
            event_type: string_prop(&props, "type"),
            what: string_prop(&props, "what"),
            start: string_prop(&props, "start").or_else(|| when.clone()),
            stop: string_prop(&props, "stop").or(when),
            secret: string_prop(&props, "secret"),
            tags: serde_json::Value::Object(props),
            geometry,
        })
    }
}

fn string_prop(props: &TagMap, key: &str) -> Option<String> {
    props
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
}

fn encode_geometry(body: &WriteBody) -> Result<Option<String>, StoreError> {
    body.geometry
        .as_ref()
        .map(|g| {
            serde_json::to_string(g)
                .map_err(|e| StoreError::InvalidGeometry(format!("unencodable geometry: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    fn body(json: &str) -> WriteBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn full_body_yields_closed_bounds_for_single_instant() {
        let (draft, warnings) = EventDraft::from_body(&body(
            r#"{
                "type": "Feature",
                "properties": {"type": "unscheduled", "what": "fire.wild", "when": "2026-08-07T12:00:00Z"},
                "geometry": {"type": "Point", "coordinates": [2.35, 48.85]}
            }"#,
        ))
        .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(draft.bounds, "[]");
        assert_eq!(draft.start, draft.stop);
        assert!(draft.geometry.is_some());
    }

    #[test]
    fn distinct_start_stop_yield_half_open_bounds() {
        let (draft, _) = EventDraft::from_body(&body(
            r#"{
                "type": "Feature",
                "properties": {"type": "scheduled", "what": "concert",
                               "start": "2026-08-07T18:00:00Z", "stop": "2026-08-07T23:00:00Z"},
                "geometry": {"type": "Point", "coordinates": [2.35, 48.85]}
            }"#,
        ))
        .unwrap();
        assert_eq!(draft.bounds, "[)");
    }

    #[test]
    fn missing_geometry_is_a_warning_not_a_block() {
        let (draft, warnings) = EventDraft::from_body(&body(
            r#"{
                "type": "Feature",
                "properties": {"type": "unscheduled", "what": "strike", "when": "NOW"},
                "geometry": null
            }"#,
        ))
        .unwrap();
        assert!(draft.geometry.is_none());
        assert!(warnings.iter().any(|w| w.contains("geometry")));
    }

    #[test]
    fn missing_what_blocks_creation_with_all_warnings() {
        let err = EventDraft::from_body(&body(
            r#"{"type": "Feature", "properties": {"type": "unscheduled"}, "geometry": null}"#,
        ));
        match err {
            Err(StoreError::Validation(warnings)) => {
                assert!(warnings.iter().any(|w| w.contains("'what'")));
                assert!(warnings.iter().any(|w| w.contains("'when'")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_feature_kind_is_warned() {
        let (_, warnings) = EventDraft::from_body(&body(
            r#"{
                "type": "FeatureCollection",
                "properties": {"type": "t", "what": "w", "when": "NOW"},
                "geometry": null
            }"#,
        ))
        .unwrap();
        assert!(warnings.iter().any(|w| w.contains("Feature")));
    }

    #[test]
    fn patch_extracts_secret_and_falls_back_to_when() {
        let patch = EventPatch::from_body(&body(
            r#"{
                "properties": {"secret": "s3cret", "when": "2026-08-07T12:00:00Z", "severity": "high"},
                "geometry": null
            }"#,
        ))
        .unwrap();

        assert_eq!(patch.secret.as_deref(), Some("s3cret"));
        assert_eq!(patch.start.as_deref(), Some("2026-08-07T12:00:00Z"));
        assert_eq!(patch.stop.as_deref(), Some("2026-08-07T12:00:00Z"));
        assert_eq!(patch.event_type, None);
        assert_eq!(patch.what, None);
        // The tag overlay still carries the free-form keys; the SQL strips
        // the secret before merging.
        assert!(patch.tags.get("severity").is_some());
    }

    #[test]
    fn empty_patch_keeps_everything() {
        let patch = EventPatch::from_body(&body(r#"{"geometry": null}"#)).unwrap();
        assert_eq!(patch.event_type, None);
        assert_eq!(patch.what, None);
        assert_eq!(patch.start, None);
        assert_eq!(patch.stop, None);
        assert_eq!(patch.geometry, None);
        assert_eq!(patch.tags, serde_json::json!({}));
    }
}
