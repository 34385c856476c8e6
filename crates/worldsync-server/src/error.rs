//! Error types for the HTTP layer.
//!
//! [`ApiError`] covers every way a pass-through request can be rejected
//! and converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors returned by the REST pass-through endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body was not valid JSON.
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The request body was JSON but not an object.
    #[error("request body must be a JSON object")]
    NotAnObject,

    /// The body did not contain the entity named in the path.
    #[error("request body has no key {0:?}")]
    MissingEntity(String),

    /// The entity's value in the body was not an object of fields.
    #[error("fields for {0:?} must be a JSON object")]
    InvalidFields(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
