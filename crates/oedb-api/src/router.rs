//! Axum router construction for the event API.
//!
//! Assembles all routes into a single [`Router`] with CORS middleware
//! enabled for cross-origin clients.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router for the event API.
///
/// The router includes:
/// - `GET /event` -- search
/// - `POST /event` -- create
/// - `POST /event/search` -- search with a geometry body
/// - `GET /event/{id}` -- single event
/// - `PUT`/`PATCH /event/{id}` -- coalesce update
/// - `DELETE /event/{id}` -- archive and delete
/// - `GET /stats` -- aggregate statistics
///
/// CORS is configured to allow any origin so browser clients can query the
/// database directly. In production this should be restricted.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/event",
            get(handlers::search_events).post(handlers::create_event),
        )
        .route("/event/search", axum::routing::post(handlers::search_by_geometry))
        .route(
            "/event/{id}",
            get(handlers::get_event)
                .put(handlers::update_event)
                .patch(handlers::update_event)
                .delete(handlers::delete_event),
        )
        .route("/stats", get(handlers::stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
