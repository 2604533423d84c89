//! Port interfaces implemented by the infrastructure layer.
//!
//! All ports take and return domain types; identifiers are `Uuid`, so a
//! malformed identifier is unrepresentable below the HTTP boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use docflow_domain::{
    ClassificationUpdate, ClassifierVerdict, CorrelationId, Document, DocumentMessage,
    NewDocument, Result,
};
use uuid::Uuid;

/// Source-of-truth persistence for documents.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Persist a new document. Assigns `created_at = updated_at = now`,
    /// `classification = "unclassified"`, source `"ml"`. Returns the
    /// persisted entity.
    async fn insert(&self, doc: NewDocument) -> Result<Document>;

    /// Fetch a document, or `None` when absent.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Document>>;

    /// List documents, optionally filtered by exact classification, ordered
    /// by `created_at` descending with a deterministic id tiebreak.
    async fn list(
        &self,
        classification: Option<&str>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Document>>;

    /// Documents whose metadata contains all supplied pairs exactly.
    /// An empty query matches none.
    async fn search_metadata(
        &self,
        pairs: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<Document>>;

    /// Conditionally record an ML verdict. A no-op returning `false` when the
    /// record does not exist, was manually corrected, or already carries an
    /// ML classification (duplicate delivery protection).
    async fn update_classification(&self, id: Uuid, update: &ClassificationUpdate)
        -> Result<bool>;

    /// Unconditionally apply a human correction; clears the model's
    /// confidence and score vector, and the OCR path too when the label is
    /// the `"unclassified"` sentinel. Returns whether the record existed.
    async fn correct_classification(&self, id: Uuid, new_label: &str) -> Result<bool>;

    /// Return the document to the `"unclassified"` state for a retry.
    /// Returns whether the record existed.
    async fn reset_classification(&self, id: Uuid) -> Result<bool>;

    /// Remove the record. Returns whether a row was present.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Durable byte storage addressed by relative keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key`, creating parent directories as needed.
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Read the bytes under `key`, or `None` when absent.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the blob under `key`. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// The external classifier, including whatever protection wraps it.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one document's bytes. Fails with `CircuitOpen` when the
    /// breaker rejects the call and `Transient` for classifier failures.
    async fn classify(
        &self,
        content: &[u8],
        mime_type: &str,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<ClassifierVerdict>;
}

/// Publisher side of the queue substrate.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Publish a classification job to the document exchange.
    async fn publish(&self, message: &DocumentMessage) -> Result<()>;
}
