//! REST endpoint handlers for the event API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/event` | Search events by space, time, and tag |
//! | `POST` | `/event/search` | Search with a GeoJSON geometry body |
//! | `GET` | `/event/{id}` | Get a single event |
//! | `POST` | `/event` | Create an event |
//! | `PUT`/`PATCH` | `/event/{id}` | Coalesce-update an event |
//! | `DELETE` | `/event/{id}` | Archive and delete an event |
//! | `GET` | `/stats` | Aggregate statistics |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oedb_db::{EventRepository, GeomMode, SearchPredicate, WriteOutcome};
use oedb_types::WriteBody;
use uuid::Uuid;

use crate::error::ApiError;
use crate::projector;
use crate::state::AppState;

/// Raw query-string parameters.
///
/// Search parameters are heterogeneous (`bbox` and `near` are
/// comma-separated number lists, `where:osm` carries a colon), so they are
/// taken as a flat string map and interpreted by the predicate builder.
type RawParams = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// GET /event -- search
// ---------------------------------------------------------------------------

/// Search events by space, time, and tag.
///
/// # Query Parameters
///
/// - `bbox`: 4 numbers (two opposite box corners)
/// - `near`: lon, lat, optional radius in meters (default 1)
/// - `polyline` (+ `buffer`, `polyline_precision`): encoded polyline corridor
/// - `where:osm` / `where:wikidata`: external-id equality
/// - `when` | `start`/`stop`: absolute or relative time tokens
/// - `what`: prefix match on the dotted tag
/// - `type`: exact category match
/// - `limit`: row cap (default 200)
/// - `geom`: `full` | `only` | grid size (default: centroid)
pub async fn search_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RawParams>,
) -> Result<impl IntoResponse, ApiError> {
    run_search(&state, &params, None).await
}

// ---------------------------------------------------------------------------
// POST /event/search -- search with a geometry body
// ---------------------------------------------------------------------------

/// Search with an explicit GeoJSON geometry as the spatial reference.
///
/// The body is a GeoJSON Feature; its geometry is intersected with stored
/// events, buffered by the optional `buffer` query parameter (default 1000 m
/// for LineString bodies). All other search parameters apply unchanged.
pub async fn search_by_geometry(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RawParams>,
    Json(body): Json<WriteBody>,
) -> Result<Response, ApiError> {
    let result = run_search(&state, &params, body.geometry.as_ref()).await?;
    Ok(result.into_response())
}

async fn run_search(
    state: &AppState,
    params: &RawParams,
    body_geometry: Option<&geojson::Geometry>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let predicate = SearchPredicate::from_params(params, body_geometry)?;
    let repository = EventRepository::new(state.pool.pool());
    let rows = repository.search(&predicate).await?;
    let geom_only = matches!(predicate.geom_mode, GeomMode::Only);
    Ok(Json(projector::collection(&rows, geom_only)))
}

// ---------------------------------------------------------------------------
// GET /event/{id} -- single event
// ---------------------------------------------------------------------------

/// Return a single event as a GeoJSON Feature with its full geometry.
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_uuid(&id_str)?;
    let repository = EventRepository::new(state.pool.pool());
    let row = repository.get(id).await?;
    Ok(Json(projector::feature(&row, false)))
}

// ---------------------------------------------------------------------------
// POST /event -- create
// ---------------------------------------------------------------------------

/// Create an event from a GeoJSON Feature body.
///
/// Responds `201` with the new id, or `409` with the pre-existing id when an
/// equivalent event is already stored (identical resubmissions are safe
/// retries).
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WriteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = EventRepository::new(state.pool.pool());
    let outcome = repository.create(&body).await?;
    Ok(write_response(outcome))
}

// ---------------------------------------------------------------------------
// PUT/PATCH /event/{id} -- coalesce update
// ---------------------------------------------------------------------------

/// Apply a partial update; omitted fields keep their stored values.
///
/// PUT acts like PATCH. The per-event secret may be supplied in
/// `properties.secret` or the `secret` query parameter.
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    Query(params): Query<RawParams>,
    Json(body): Json<WriteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_uuid(&id_str)?;
    let repository = EventRepository::new(state.pool.pool());
    let outcome = repository
        .update(id, &body, params.get("secret").map(String::as_str))
        .await?;
    Ok(write_response(outcome))
}

// ---------------------------------------------------------------------------
// DELETE /event/{id} -- archive and delete
// ---------------------------------------------------------------------------

/// Archive the event into the retention log, then delete it, guarded by the
/// per-event secret (`secret` query parameter).
pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    Query(params): Query<RawParams>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_uuid(&id_str)?;
    let repository = EventRepository::new(state.pool.pool());
    repository
        .remove(id, params.get("secret").map(String::as_str))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET /stats -- aggregate statistics
// ---------------------------------------------------------------------------

/// Return aggregate statistics: estimated event count, freshness, engine
/// uptime, and a per-`what` summary of recent events.
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let repository = EventRepository::new(state.pool.pool());
    let summary = repository.stats().await?;
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a write outcome to its response: `201 {"id"}` for a creation,
/// `200 {"id"}` for an update, `409 {"duplicate"}` for a suppressed write.
fn write_response(outcome: WriteOutcome) -> Response {
    match outcome {
        WriteOutcome::Created(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": id })),
        )
            .into_response(),
        WriteOutcome::Updated(id) => {
            (StatusCode::OK, Json(serde_json::json!({ "id": id }))).into_response()
        }
        WriteOutcome::Duplicate(id) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "duplicate": id })),
        )
            .into_response(),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::InvalidUuid(raw.to_owned()))
}
