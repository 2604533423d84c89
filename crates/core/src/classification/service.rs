//! Classification service - the per-delivery processing sequence.
//!
//! One call to [`ClassificationService::process`] is one attempt for one
//! delivery: fetch the record, fetch the bytes, call the classifier, persist
//! the OCR artifact, and conditionally write the verdict back. The caller
//! (the broker consumer) maps the result onto ack/reject; retry scheduling
//! lives entirely in the DLQ reprocessor.
//!
//! Concurrent deliveries for the same document are safe because the
//! repository's conditional update is the serialization point: at most one
//! ML update wins.

use std::sync::Arc;
use std::time::Instant;

use docflow_common::PipelineMetrics;
use docflow_domain::storage::ocr_blob_key;
use docflow_domain::{ClassificationUpdate, DocumentMessage, PipelineError, Result};
use tracing::{debug, info};

use crate::ports::{BlobStore, Classifier, DocumentRepository};

/// How one attempt ended. Every variant is acknowledged by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The verdict was written back.
    Completed,
    /// The document no longer exists (duplicate delivery after a delete).
    MissingDocument,
    /// The conditional update declined: already classified or manually
    /// corrected.
    AlreadyClassified,
}

/// Orchestrates the fetch-classify-update sequence over the ports.
pub struct ClassificationService {
    documents: Arc<dyn DocumentRepository>,
    blobs: Arc<dyn BlobStore>,
    classifier: Arc<dyn Classifier>,
    metrics: Arc<PipelineMetrics>,
}

impl ClassificationService {
    /// Create a new classification service.
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        classifier: Arc<dyn Classifier>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self { documents, blobs, classifier, metrics }
    }

    /// Run one processing attempt for `message`, updating the attempt
    /// counters and timing histogram around it.
    pub async fn process(&self, message: &DocumentMessage) -> Result<ProcessOutcome> {
        let started = Instant::now();
        let result = self.process_inner(message).await;

        match &result {
            Ok(ProcessOutcome::Completed) => self.metrics.record_classified(),
            Ok(_) => {}
            Err(PipelineError::CircuitOpen) => {
                self.metrics.record_circuit_open();
                self.metrics.record_classification_error();
            }
            Err(_) => self.metrics.record_classification_error(),
        }
        self.metrics.record_processing_time(started.elapsed());

        result
    }

    async fn process_inner(&self, message: &DocumentMessage) -> Result<ProcessOutcome> {
        let document_id = message.document_id;

        let Some(document) = self.documents.get_by_id(document_id).await? else {
            info!(%document_id, "document absent; treating delivery as a no-op");
            return Ok(ProcessOutcome::MissingDocument);
        };

        let bytes = self.blobs.load(&document.storage_path).await?.ok_or_else(|| {
            PipelineError::Integrity(format!("blob missing: {}", document.storage_path))
        })?;

        let verdict = self
            .classifier
            .classify(&bytes, &document.mime_type, message.correlation_id.as_ref())
            .await?;

        let ocr_storage_path = match &verdict.ocr {
            Some(ocr) => {
                let key = ocr_blob_key(document_id);
                let payload = serde_json::to_vec(ocr).map_err(|e| {
                    PipelineError::Integrity(format!("unserializable OCR artifact: {e}"))
                })?;
                self.blobs.store(&key, &payload).await?;
                Some(key)
            }
            None => None,
        };

        let update = ClassificationUpdate {
            classification: verdict.classification,
            confidence: verdict.confidence,
            ocr_storage_path,
            label_scores: Some(verdict.scores),
        };

        let updated = self.documents.update_classification(document_id, &update).await?;
        if !updated {
            info!(
                %document_id,
                "verdict discarded: already classified or manually corrected"
            );
            return Ok(ProcessOutcome::AlreadyClassified);
        }

        debug!(%document_id, classification = %update.classification, "verdict recorded");
        Ok(ProcessOutcome::Completed)
    }
}
