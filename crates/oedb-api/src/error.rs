//! Error types for the event API layer.
//!
//! [`ApiError`] unifies all failure modes into a single enum that can be
//! converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use oedb_db::StoreError;

/// Errors that can occur in the event API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A storage-layer failure or domain outcome.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A UUID could not be parsed from the request path.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Store(err) => match err {
                StoreError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                StoreError::Unauthorized { .. } => (StatusCode::FORBIDDEN, err.to_string()),
                StoreError::Validation(_)
                | StoreError::InvalidGeometry(_)
                | StoreError::MalformedQuery(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                StoreError::Postgres(e) => {
                    // Engine details stay server-side.
                    tracing::error!(error = %e, "storage failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        String::from("storage failure"),
                    )
                }
                StoreError::Migration(_) | StoreError::Config(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from("internal error"),
                ),
            },
            Self::InvalidUuid(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(
            status_of(StoreError::NotFound.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                StoreError::Unauthorized {
                    secret_supplied: true
                }
                .into()
            ),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(StoreError::MalformedQuery(String::from("limit")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::InvalidGeometry(String::from("ring")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::InvalidUuid(String::from("nope"))),
            StatusCode::BAD_REQUEST
        );
    }
}
