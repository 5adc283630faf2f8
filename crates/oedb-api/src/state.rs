//! Shared application state for the event API server.
//!
//! [`AppState`] holds the `PostgreSQL` pool handle. It is built once at
//! startup, wrapped in [`Arc`](std::sync::Arc), and injected into handlers
//! via Axum's `State` extractor; requests share no other mutable state.

use oedb_db::PostgresPool;

/// Shared state for the Axum application.
#[derive(Clone)]
pub struct AppState {
    /// Connection pool to the storage engine.
    pub pool: PostgresPool,
}

impl AppState {
    /// Create application state over a connected pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}
