//! SQLite implementation of the document repository.
//!
//! Every port method checks one connection out of the pool and runs a single
//! short transaction on the blocking pool. The conditional-update rules live
//! in the SQL `WHERE` clauses, which makes the repository the serialization
//! point for concurrent deliveries of the same document.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docflow_core::DocumentRepository;
use docflow_domain::constants::UNCLASSIFIED;
use docflow_domain::{
    ClassificationSource, ClassificationUpdate, Document, NewDocument, PipelineError, Result,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use super::manager::DbManager;
use crate::errors::{map_join_error, map_sqlite_error};

const DOCUMENT_COLUMNS: &str = "id, storage_path, original_filename, mime_type, \
     file_size_bytes, classification, confidence, label_scores, classification_source, \
     ocr_storage_path, metadata, corrected_at, created_at, updated_at";

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository {
    db: Arc<DbManager>,
}

impl SqliteDocumentRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn insert(&self, doc: NewDocument) -> Result<Document> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Document> {
            let metadata_json = serde_json::to_string(&doc.metadata)
                .map_err(|e| PipelineError::Integrity(format!("unserializable metadata: {e}")))?;
            let conn = db.get_connection()?;
            insert_document(&conn, &doc, &metadata_json).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Option<Document>> {
            let conn = db.get_connection()?;
            query_by_id(&conn, id).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(
        &self,
        classification: Option<&str>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Document>> {
        let db = Arc::clone(&self.db);
        let classification = classification.map(str::to_string);

        task::spawn_blocking(move || -> Result<Vec<Document>> {
            let conn = db.get_connection()?;
            query_list(&conn, classification.as_deref(), limit, offset).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn search_metadata(
        &self,
        pairs: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<Document>> {
        // An empty query matches none; a containment filter with no required
        // pairs is treated as unsatisfiable.
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let db = Arc::clone(&self.db);
        let pairs = pairs.clone();

        task::spawn_blocking(move || -> Result<Vec<Document>> {
            let conn = db.get_connection()?;
            query_search_metadata(&conn, &pairs, limit).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update_classification(
        &self,
        id: Uuid,
        update: &ClassificationUpdate,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let update = update.clone();

        task::spawn_blocking(move || -> Result<bool> {
            let scores_json = match &update.label_scores {
                Some(scores) => Some(serde_json::to_string(scores).map_err(|e| {
                    PipelineError::Integrity(format!("unserializable label scores: {e}"))
                })?),
                None => None,
            };
            let conn = db.get_connection()?;
            apply_ml_update(&conn, id, &update, scores_json.as_deref()).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn correct_classification(&self, id: Uuid, new_label: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let new_label = new_label.to_string();

        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            apply_manual_correction(&conn, id, &new_label).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn reset_classification(&self, id: Uuid) -> Result<bool> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            apply_reset(&conn, id).map_err(map_sqlite_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let affected = conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
                .map_err(map_sqlite_error)?;
            Ok(affected > 0)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn insert_document(
    conn: &Connection,
    doc: &NewDocument,
    metadata_json: &str,
) -> rusqlite::Result<Document> {
    let now = Utc::now();
    let now_micros = now.timestamp_micros();

    conn.execute(
        "INSERT INTO documents (id, storage_path, original_filename, mime_type,
                                file_size_bytes, classification, classification_source,
                                metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'ml', ?7, ?8, ?8)",
        params![
            doc.id.to_string(),
            doc.storage_path,
            doc.original_filename,
            doc.mime_type,
            doc.file_size_bytes,
            UNCLASSIFIED,
            metadata_json,
            now_micros,
        ],
    )?;

    Ok(Document {
        id: doc.id,
        storage_path: doc.storage_path.clone(),
        original_filename: doc.original_filename.clone(),
        mime_type: doc.mime_type.clone(),
        file_size_bytes: doc.file_size_bytes,
        classification: UNCLASSIFIED.to_string(),
        confidence: None,
        label_scores: None,
        classification_source: ClassificationSource::Ml,
        ocr_storage_path: None,
        metadata: doc.metadata.clone(),
        corrected_at: None,
        created_at: micros_to_datetime(now_micros, 13)?,
        updated_at: micros_to_datetime(now_micros, 13)?,
    })
}

fn query_by_id(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<Document>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], map_document_row).optional()
}

fn query_list(
    conn: &Connection,
    classification: Option<&str>,
    limit: u32,
    offset: u64,
) -> rusqlite::Result<Vec<Document>> {
    match classification {
        Some(class) => {
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE classification = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT {limit} OFFSET {offset}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![class], map_document_row)?;
            rows.collect()
        }
        None => {
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 ORDER BY created_at DESC, id DESC
                 LIMIT {limit} OFFSET {offset}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![], map_document_row)?;
            rows.collect()
        }
    }
}

fn query_search_metadata(
    conn: &Connection,
    pairs: &BTreeMap<String, String>,
    limit: u32,
) -> rusqlite::Result<Vec<Document>> {
    // One EXISTS subquery per required pair; json_each sidesteps json-path
    // quoting entirely, so keys may contain any characters.
    let clause = "EXISTS (SELECT 1 FROM json_each(documents.metadata) \
                  WHERE json_each.key = ? AND json_each.value = ?)";
    let clauses = vec![clause; pairs.len()].join(" AND ");
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE {clauses}
         ORDER BY created_at DESC, id DESC
         LIMIT {limit}"
    );

    let mut values: Vec<String> = Vec::with_capacity(pairs.len() * 2);
    for (key, value) in pairs {
        values.push(key.clone());
        values.push(value.clone());
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), map_document_row)?;
    rows.collect()
}

fn apply_ml_update(
    conn: &Connection,
    id: Uuid,
    update: &ClassificationUpdate,
    scores_json: Option<&str>,
) -> rusqlite::Result<bool> {
    let now_micros = Utc::now().timestamp_micros();

    // The guard makes this a no-op for missing rows, manual corrections,
    // and rows that already carry an ML verdict (duplicate deliveries).
    let affected = conn.execute(
        "UPDATE documents
         SET classification = ?1,
             confidence = ?2,
             ocr_storage_path = ?3,
             label_scores = ?4,
             classification_source = 'ml',
             updated_at = MAX(updated_at + 1, ?5)
         WHERE id = ?6
           AND classification = ?7
           AND classification_source <> 'manual'",
        params![
            update.classification,
            update.confidence,
            update.ocr_storage_path,
            scores_json,
            now_micros,
            id.to_string(),
            UNCLASSIFIED,
        ],
    )?;

    Ok(affected > 0)
}

fn apply_manual_correction(conn: &Connection, id: Uuid, new_label: &str) -> rusqlite::Result<bool> {
    let now_micros = Utc::now().timestamp_micros();

    // The model's confidence and score vector describe a label the human
    // just overruled; clear them rather than leave them contradicting the
    // new classification. A correction back to the sentinel also drops the
    // OCR path: unclassified rows carry no artifacts.
    let affected = conn.execute(
        "UPDATE documents
         SET classification = ?1,
             classification_source = 'manual',
             confidence = NULL,
             label_scores = NULL,
             ocr_storage_path = CASE WHEN ?1 = ?4 THEN NULL ELSE ocr_storage_path END,
             corrected_at = ?2,
             updated_at = MAX(updated_at + 1, ?2)
         WHERE id = ?3",
        params![new_label, now_micros, id.to_string(), UNCLASSIFIED],
    )?;

    Ok(affected > 0)
}

fn apply_reset(conn: &Connection, id: Uuid) -> rusqlite::Result<bool> {
    let now_micros = Utc::now().timestamp_micros();

    let affected = conn.execute(
        "UPDATE documents
         SET classification = ?1,
             classification_source = 'ml',
             confidence = NULL,
             ocr_storage_path = NULL,
             label_scores = NULL,
             corrected_at = NULL,
             updated_at = MAX(updated_at + 1, ?2)
         WHERE id = ?3",
        params![UNCLASSIFIED, now_micros, id.to_string()],
    )?;

    Ok(affected > 0)
}

// ============================================================================
// Row Mapping
// ============================================================================

fn map_document_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let id_text: String = row.get(0)?;
    let id = Uuid::parse_str(&id_text).map_err(|e| column_error(0, e))?;

    let source_text: String = row.get(8)?;
    let classification_source = source_text
        .parse::<ClassificationSource>()
        .map_err(|e| column_error(8, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let label_scores: Option<BTreeMap<String, f64>> = row
        .get::<_, Option<String>>(7)?
        .map(|json| serde_json::from_str(&json).map_err(|e| column_error(7, e)))
        .transpose()?;

    let metadata_json: String = row.get(10)?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).map_err(|e| column_error(10, e))?;

    let corrected_at = row
        .get::<_, Option<i64>>(11)?
        .map(|micros| micros_to_datetime(micros, 11))
        .transpose()?;

    Ok(Document {
        id,
        storage_path: row.get(1)?,
        original_filename: row.get(2)?,
        mime_type: row.get(3)?,
        file_size_bytes: row.get(4)?,
        classification: row.get(5)?,
        confidence: row.get(6)?,
        label_scores,
        classification_source,
        ocr_storage_path: row.get(9)?,
        metadata,
        corrected_at,
        created_at: micros_to_datetime(row.get(12)?, 12)?,
        updated_at: micros_to_datetime(row.get(13)?, 13)?,
    })
}

fn micros_to_datetime(micros: i64, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        column_error(
            column,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {micros}"),
            ),
        )
    })
}

fn column_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

// ============================================================================
// Tests
// ============================================================================
