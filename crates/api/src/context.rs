//! Application context shared by the route handlers.

use std::sync::Arc;

use docflow_common::PipelineMetrics;
use docflow_core::{BlobStore, DocumentRepository, JobPublisher};
use docflow_domain::AppConfig;

/// Everything a request handler needs, injected once at startup.
///
/// Handlers only see the ports; the binary decides which implementations
/// back them, and tests swap in stubs.
pub struct AppContext {
    pub config: AppConfig,
    pub documents: Arc<dyn DocumentRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub publisher: Arc<dyn JobPublisher>,
    pub metrics: Arc<PipelineMetrics>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        documents: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        publisher: Arc<dyn JobPublisher>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self { config, documents, blobs, publisher, metrics }
    }
}
