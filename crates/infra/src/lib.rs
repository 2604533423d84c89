//! # DocFlow Infra
//!
//! Infrastructure adapters behind the core ports:
//! - [`database`]: SQLite document repository (rusqlite + r2d2)
//! - [`storage`]: filesystem blob store
//! - [`broker`]: AMQP queue substrate (topology, publisher, the
//!   classification worker, and the DLQ reprocessor)
//! - [`classifier`]: HTTP gateway to the external classifier behind the
//!   circuit breaker
//! - [`config`]: environment-based configuration loading

pub mod broker;
pub mod classifier;
pub mod config;
pub mod database;
pub mod errors;
pub mod storage;

pub use broker::{
    connect_broker, declare_topology, AmqpJobPublisher, ClassificationWorker,
    ClassificationWorkerConfig, DlqReprocessor,
};
pub use classifier::HttpClassifier;
pub use database::{DbManager, SqliteDocumentRepository};
pub use storage::FsBlobStore;
