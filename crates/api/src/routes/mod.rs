//! HTTP routers.

pub mod documents;
pub mod ops;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;

use crate::context::AppContext;

pub use ops::build_ops_router;

/// Headroom on top of the upload ceiling for multipart framing and metadata
/// parts; the handler enforces the exact per-file limit.
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

/// Build the document API router.
pub fn build_router(context: Arc<AppContext>) -> Router {
    let max_upload_bytes = context.config.http.max_upload_bytes.saturating_add(BODY_LIMIT_OVERHEAD);

    Router::new()
        .route("/api/documents/upload", post(documents::upload))
        .route("/api/documents", get(documents::list))
        .route("/api/documents/search", get(documents::search))
        .route("/api/documents/{id}", get(documents::get_by_id).delete(documents::delete))
        .route("/api/documents/{id}/download", get(documents::download))
        .route("/api/documents/{id}/ocr", get(documents::ocr))
        .route("/api/documents/{id}/classification", patch(documents::correct))
        .route("/api/documents/{id}/retry", post(documents::retry))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(context)
}
