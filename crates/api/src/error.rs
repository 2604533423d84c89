//! Mapping pipeline errors onto HTTP responses.
//!
//! Validation failures carry the structured `fieldErrors` shape; everything
//! else is `{"error": message}` with the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docflow_domain::PipelineError;
use serde_json::json;
use tracing::{error, info, warn};

/// Response-side error for the route handlers.
pub enum ApiError {
    Pipeline(PipelineError),
    /// Upload body exceeded the configured ceiling.
    PayloadTooLarge { limit_bytes: usize },
}

/// Result alias used by the route handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let pipeline_error = match self {
            Self::PayloadTooLarge { limit_bytes } => {
                return (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    Json(json!({
                        "error": format!("upload exceeds the {limit_bytes}-byte limit")
                    })),
                )
                    .into_response();
            }
            Self::Pipeline(err) => err,
        };

        match pipeline_error {
            PipelineError::Validation(field_errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Validation failed", "fieldErrors": field_errors })),
            )
                .into_response(),
            PipelineError::NotFound(message) => {
                info!(%message, "request target not found");
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            PipelineError::Transient(message) => {
                warn!(%message, "transient failure surfaced to caller");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message })))
                    .into_response()
            }
            PipelineError::CircuitOpen => {
                warn!("circuit open surfaced to caller");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Classifier circuit open" })),
                )
                    .into_response()
            }
            PipelineError::Integrity(message) => {
                error!(%message, "integrity failure surfaced to caller");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message })))
                    .into_response()
            }
        }
    }
}
