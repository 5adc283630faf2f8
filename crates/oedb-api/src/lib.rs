//! HTTP API for the oedb event database.
//!
//! This crate provides an Axum HTTP server exposing search, point lookup,
//! create, coalesce update, and archive-then-delete over the event store,
//! with GeoJSON Feature/`FeatureCollection` responses.
//!
//! # Architecture
//!
//! Each request runs on an independent task with a pooled storage
//! connection; handlers translate request parameters into a typed search
//! predicate or a write body, call the repository, and project rows to the
//! external Feature form (with the per-event `secret` redacted).

pub mod error;
pub mod handlers;
pub mod projector;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{start_server, ServerConfig, ServerError};
pub use state::AppState;
