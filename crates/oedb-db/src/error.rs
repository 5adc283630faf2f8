//! Error types for the storage layer.
//!
//! All errors are propagated via [`StoreError`], which wraps the underlying
//! [`sqlx`] errors and carries the domain outcomes that are part of the API
//! contract (authorization, validation, geometry diagnostics).

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A write body is missing too much to be usable. Carries the full list
    /// of collected warnings.
    #[error("invalid write body: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The submitted geometry is not well-formed. Carries the engine's
    /// diagnostic reason text.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The requested event does not exist.
    #[error("event not found")]
    NotFound,

    /// A write was refused by the per-event secret check.
    #[error("{}", if *.secret_supplied { "secret does not match" } else { "secret required" })]
    Unauthorized {
        /// Whether the caller supplied a secret at all. Distinguishes
        /// "secret required" from "secret does not match" in the message.
        secret_supplied: bool,
    },

    /// A search filter parameter could not be parsed.
    #[error("malformed query: {0}")]
    MalformedQuery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_distinguishes_missing_from_wrong() {
        let missing = StoreError::Unauthorized {
            secret_supplied: false,
        };
        let wrong = StoreError::Unauthorized {
            secret_supplied: true,
        };
        assert_eq!(missing.to_string(), "secret required");
        assert_eq!(wrong.to_string(), "secret does not match");
    }

    #[test]
    fn validation_joins_warnings() {
        let err = StoreError::Validation(vec![
            String::from("missing 'what' in properties"),
            String::from("missing 'type' of event in properties"),
        ]);
        assert!(err.to_string().contains("missing 'what'"));
        assert!(err.to_string().contains("; "));
    }
}
