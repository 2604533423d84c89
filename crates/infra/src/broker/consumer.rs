//! Classification worker: consumes jobs and drives the processing sequence.
//!
//! The worker owns the transport concerns: prefetch, body parsing, the
//! correlation-bound logging span, and mapping outcomes onto broker
//! acknowledgements. Every failed attempt is rejected without requeue so the
//! dead-letter path takes over; retry pacing is the reprocessor's job, which
//! keeps loop rates bounded even when the classifier is down.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::ClassificationService;
use docflow_domain::constants::QUEUE_CLASSIFICATION;
use docflow_domain::{DocumentMessage, PipelineError, Result};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, Consumer};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::topology::declare_topology;
use crate::errors::map_broker_error;

/// Configuration for the classification worker.
#[derive(Debug, Clone)]
pub struct ClassificationWorkerConfig {
    /// Unacknowledged-delivery cap; 1 keeps nack/retry ordering predictable.
    pub prefetch: u16,
    /// Consumer tag reported to the broker.
    pub consumer_tag: String,
    /// Join timeout when stopping.
    pub join_timeout: Duration,
}

impl Default for ClassificationWorkerConfig {
    fn default() -> Self {
        Self {
            prefetch: 1,
            consumer_tag: "docflow-worker".to_string(),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Classification worker with explicit lifecycle management.
pub struct ClassificationWorker {
    connection: Arc<Connection>,
    service: Arc<ClassificationService>,
    config: ClassificationWorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ClassificationWorker {
    /// Create a new worker; call [`start`](Self::start) to begin consuming.
    pub fn new(
        connection: Arc<Connection>,
        service: Arc<ClassificationService>,
        config: ClassificationWorkerConfig,
    ) -> Self {
        Self {
            connection,
            service,
            config,
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Start the worker, spawning the background consume task.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(PipelineError::Transient("worker already running".into()));
        }

        info!("starting classification worker");
        self.cancellation = CancellationToken::new();

        let channel = self.connection.create_channel().await.map_err(map_broker_error)?;
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(map_broker_error)?;
        declare_topology(&channel).await?;

        let consumer = channel
            .basic_consume(
                QUEUE_CLASSIFICATION,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_broker_error)?;

        let service = Arc::clone(&self.service);
        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            Self::consume_loop(channel, consumer, service, cancel).await;
        });

        self.task_handle = Some(handle);
        info!("classification worker started");
        Ok(())
    }

    /// Stop the worker: cancel the consumer and wait for the in-flight
    /// delivery to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(PipelineError::Transient("worker not running".into()));
        }

        info!("stopping classification worker");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "worker task panicked");
                    return Err(PipelineError::Transient("worker task panicked".into()));
                }
                Err(_) => {
                    warn!("worker task did not complete within timeout");
                    return Err(PipelineError::Transient("worker join timeout".into()));
                }
            }
        }

        info!("classification worker stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true when a worker task is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Background consume loop. Holds the channel so it stays open for the
    /// lifetime of the consumer.
    async fn consume_loop(
        _channel: Channel,
        mut consumer: Consumer,
        service: Arc<ClassificationService>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("worker consume loop cancelled");
                    break;
                }
                delivery = consumer.next() => match delivery {
                    None => {
                        warn!("consumer stream closed by broker");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "consumer stream failed");
                        break;
                    }
                    Some(Ok(delivery)) => {
                        Self::handle_delivery(&service, delivery).await;
                    }
                },
            }
        }
    }

    /// Process one delivery and surface the outcome to the broker.
    async fn handle_delivery(service: &Arc<ClassificationService>, delivery: Delivery) {
        let message = match DocumentMessage::from_bytes(&delivery.data) {
            Ok(message) => message,
            Err(err) => {
                // Terminal: a malformed payload cannot succeed on retry. The
                // dead-letter path parks it once its budget runs out.
                warn!(error = %err, "rejecting unparseable message body");
                Self::reject(&delivery).await;
                return;
            }
        };

        let correlation_id = message
            .correlation_id
            .as_ref()
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        let span = info_span!(
            "delivery",
            document_id = %message.document_id,
            correlation_id = %correlation_id
        );

        match service.process(&message).instrument(span).await {
            Ok(outcome) => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(error = %e, "failed to ack delivery");
                } else {
                    debug!(?outcome, document_id = %message.document_id, "delivery acknowledged");
                }
            }
            Err(err) => {
                match &err {
                    PipelineError::CircuitOpen => warn!(
                        document_id = %message.document_id,
                        "circuit open; dead-lettering for delayed retry"
                    ),
                    PipelineError::Transient(msg) => warn!(
                        document_id = %message.document_id,
                        error = %msg,
                        "attempt failed; dead-lettering"
                    ),
                    other => error!(
                        document_id = %message.document_id,
                        error = %other,
                        "attempt failed terminally; dead-lettering"
                    ),
                }
                Self::reject(&delivery).await;
            }
        }
    }

    async fn reject(delivery: &Delivery) {
        if let Err(e) = delivery.reject(BasicRejectOptions { requeue: false }).await {
            error!(error = %e, "failed to reject delivery");
        }
    }
}

impl Drop for ClassificationWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ClassificationWorker dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}
