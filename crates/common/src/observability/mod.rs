//! Observability: pipeline metrics shared by the worker, reprocessor, and API.

pub mod metrics;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
