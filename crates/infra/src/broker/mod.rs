//! AMQP queue substrate: topology, publisher, consumer, reprocessor.

pub mod consumer;
pub mod publisher;
pub mod reprocessor;
pub mod topology;

pub use consumer::{ClassificationWorker, ClassificationWorkerConfig};
pub use publisher::AmqpJobPublisher;
pub use reprocessor::DlqReprocessor;
pub use topology::{connect_broker, declare_topology};
