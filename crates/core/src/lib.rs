//! # DocFlow Core
//!
//! Port interfaces and the worker orchestration logic, written entirely
//! against the ports so infrastructure can be swapped (and mocked in tests).

pub mod classification;
pub mod ports;

pub use classification::{ClassificationService, ProcessOutcome};
pub use ports::{BlobStore, Classifier, DocumentRepository, JobPublisher};
