//! Worker-side classification orchestration.

pub mod service;

pub use service::{ClassificationService, ProcessOutcome};
