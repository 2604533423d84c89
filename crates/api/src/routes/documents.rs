//! Document API handlers.
//!
//! Handlers are thin: validate, delegate to the ports, map the result. The
//! upload and retry handlers mint (or propagate) a correlation id and thread
//! it into the published job so one logical request stays traceable across
//! the queue and the classifier call.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use docflow_domain::constants::CORRELATION_HEADER;
use docflow_domain::storage::document_blob_key;
use docflow_domain::{
    CorrelationId, Document, DocumentMessage, NewDocument, PipelineError,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};
use crate::validation::{
    metadata_pairs, parse_document_id, parse_limit, parse_offset, validate_filename,
    validate_label, Validator,
};

/// Body for `PATCH /api/documents/{id}/classification`.
#[derive(Debug, Deserialize)]
pub struct CorrectionBody {
    pub classification: String,
}

/// `POST /api/documents/upload`: multipart upload.
///
/// The `file` part carries the bytes; every other text part becomes a
/// metadata entry (an optional `metadata.` prefix on the part name is
/// stripped).
pub async fn upload(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Document>> {
    let correlation_id = correlation_from(&headers);

    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::validation(".body", format!("unreadable multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let mime_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let bytes = field.bytes().await.map_err(|e| {
                PipelineError::validation(".file", format!("unreadable file part: {e}"))
            })?;
            file = Some((filename, mime_type, bytes.to_vec()));
        } else {
            let key = name.strip_prefix("metadata.").unwrap_or(&name).to_string();
            let value = field.text().await.map_err(|e| {
                PipelineError::validation(".metadata", format!("unreadable metadata part: {e}"))
            })?;
            metadata.insert(key, value);
        }
    }

    let Some((filename, mime_type, bytes)) = file else {
        return Err(PipelineError::validation(".file", "file part is required").into());
    };
    let limit_bytes = context.config.http.max_upload_bytes;
    if bytes.len() > limit_bytes {
        return Err(ApiError::PayloadTooLarge { limit_bytes });
    }
    let mut validator = Validator::new();
    validate_filename(&filename, &mut validator);
    validator.finish()?;

    let id = Uuid::new_v4();
    let storage_path = document_blob_key(id, &filename, Utc::now());
    context.blobs.store(&storage_path, &bytes).await?;

    let document = context
        .documents
        .insert(NewDocument {
            id,
            storage_path,
            original_filename: filename,
            mime_type,
            file_size_bytes: bytes.len() as i64,
            metadata,
        })
        .await?;

    context
        .publisher
        .publish(&DocumentMessage::classify(id, Some(correlation_id.clone())))
        .await?;
    context.metrics.record_uploaded();

    info!(
        document_id = %id,
        correlation_id = %correlation_id,
        size = document.file_size_bytes,
        "document uploaded and job published"
    );
    Ok(Json(document))
}

/// `GET /api/documents`: list, newest first.
pub async fn list(
    State(context): State<Arc<AppContext>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    let mut validator = Validator::new();
    let limit = parse_limit(&params, &mut validator);
    let offset = parse_offset(&params, &mut validator);
    validator.finish()?;

    let classification = params.get("classification").map(String::as_str);
    let documents = context.documents.list(classification, limit, offset).await?;
    Ok(Json(documents))
}

/// `GET /api/documents/search`: exact metadata containment.
///
/// An empty query matches none, mirroring the repository's choice.
pub async fn search(
    State(context): State<Arc<AppContext>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    let mut validator = Validator::new();
    let limit = parse_limit(&params, &mut validator);
    validator.finish()?;

    let pairs = metadata_pairs(&params);
    let documents = context.documents.search_metadata(&pairs, limit).await?;
    Ok(Json(documents))
}

/// `GET /api/documents/{id}`.
pub async fn get_by_id(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    let id = parse_document_id(&id)?;
    let document = fetch_document(&context, id).await?;
    Ok(Json(document))
}

/// `GET /api/documents/{id}/download`: the raw bytes.
pub async fn download(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_document_id(&id)?;
    let document = fetch_document(&context, id).await?;

    let bytes = context
        .blobs
        .load(&document.storage_path)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("bytes for document {id} not found")))?;

    Ok((
        [
            (header::CONTENT_TYPE, document.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.original_filename),
            ),
        ],
        bytes,
    ))
}

/// `GET /api/documents/{id}/ocr`: the OCR artifact when present.
pub async fn ocr(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_document_id(&id)?;
    let document = fetch_document(&context, id).await?;

    let ocr_path = document
        .ocr_storage_path
        .ok_or_else(|| PipelineError::NotFound(format!("no OCR artifact for document {id}")))?;
    let bytes = context
        .blobs
        .load(&ocr_path)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("no OCR artifact for document {id}")))?;

    Ok(([(header::CONTENT_TYPE, "application/json".to_string())], bytes))
}

/// `DELETE /api/documents/{id}`: remove record and blobs.
pub async fn delete(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_document_id(&id)?;
    let document = fetch_document(&context, id).await?;

    context.blobs.remove(&document.storage_path).await?;
    if let Some(ocr_path) = &document.ocr_storage_path {
        context.blobs.remove(ocr_path).await?;
    }
    context.documents.delete(id).await?;

    info!(document_id = %id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /api/documents/{id}/classification`: manual correction.
pub async fn correct(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<CorrectionBody>,
) -> ApiResult<Json<Document>> {
    let id = parse_document_id(&id)?;
    let mut validator = Validator::new();
    validate_label(&body.classification, &mut validator);
    validator.finish()?;

    let label = body.classification.trim();
    let existed = context.documents.correct_classification(id, label).await?;
    if !existed {
        return Err(PipelineError::NotFound(format!("document {id} not found")).into());
    }

    info!(document_id = %id, classification = %label, "classification corrected manually");
    let document = fetch_document(&context, id).await?;
    Ok(Json(document))
}

/// `POST /api/documents/{id}/retry`: reset and re-enqueue.
pub async fn retry(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    let id = parse_document_id(&id)?;

    let existed = context.documents.reset_classification(id).await?;
    if !existed {
        return Err(PipelineError::NotFound(format!("document {id} not found")).into());
    }

    let correlation_id = correlation_from(&headers);
    context
        .publisher
        .publish(&DocumentMessage::classify(id, Some(correlation_id.clone())))
        .await?;

    info!(document_id = %id, correlation_id = %correlation_id, "document reset and re-enqueued");
    let document = fetch_document(&context, id).await?;
    Ok(Json(document))
}

async fn fetch_document(context: &AppContext, id: Uuid) -> Result<Document, PipelineError> {
    context
        .documents
        .get_by_id(id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("document {id} not found")))
}

/// Propagate the caller's correlation id, or mint a fresh one.
fn correlation_from(headers: &HeaderMap) -> CorrelationId {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(CorrelationId::from)
        .unwrap_or_else(CorrelationId::new)
}
