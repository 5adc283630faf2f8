//! Error types for the oedb server binary.
//!
//! [`ServerError`] is the top-level error type that wraps all possible
//! failure modes during startup and serving.

/// Top-level error for the oedb server binary.
///
/// Each variant wraps a specific subsystem error, providing a single error
/// type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: crate::config::ConfigError,
    },

    /// The storage layer failed to connect or migrate.
    #[error("storage error: {source}")]
    Store {
        /// The underlying storage error.
        #[from]
        source: oedb_db::StoreError,
    },

    /// The HTTP server failed to start or serve.
    #[error("http error: {source}")]
    Http {
        /// The underlying server error.
        #[from]
        source: oedb_api::ServerError,
    },
}
