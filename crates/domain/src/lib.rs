//! # DocFlow Domain
//!
//! Pure data types, errors, and constants shared across all crates.
//!
//! This crate contains:
//! - The document entity and its wire/message forms
//! - The five-kind pipeline error taxonomy
//! - Configuration structures
//! - Blob-key derivation and shared constants
//!
//! ## Architecture
//! - No dependencies on other DocFlow crates
//! - No async, no I/O; everything here is plain data and pure functions

pub mod constants;
pub mod errors;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub use errors::{FieldErrors, PipelineError, Result};
pub use types::config::{
    AppConfig, BlobStoreConfig, BrokerConfig, ClassifierConfig, DatabaseConfig, DlqConfig,
    HttpConfig, MetricsConfig,
};
pub use types::document::{
    ClassificationSource, ClassificationUpdate, ClassifierVerdict, Document, NewDocument,
};
pub use types::message::{CorrelationId, DocumentMessage, MessageAction};
