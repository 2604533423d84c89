//! DLQ reprocessor: drains the dead-letter queue with exponential backoff.
//!
//! For every dead-lettered message the broker stamps an `x-death` header
//! listing prior dead-letterings. The reprocessor sums those counts; messages
//! within the retry budget are re-injected into the document exchange after
//! `min(base * 2^(deathCount-1), max)` of cancellable sleep, and messages
//! beyond it are parked. Structurally unreadable death histories are parked
//! too; bad messages are never dropped and never stop the loop.
//!
//! Broker failures are fatal to one drain pass; the task supervises itself
//! and reconnects a fresh channel after a short delay.

use std::sync::Arc;
use std::time::Duration;

use docflow_common::PipelineMetrics;
use docflow_domain::constants::{
    EXCHANGE_DOCUMENT, EXCHANGE_PARKING, QUEUE_DLQ, ROUTING_KEY_CLASSIFICATION,
};
use docflow_domain::{DlqConfig, PipelineError, Result};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::topology::declare_topology;
use crate::errors::map_broker_error;

const CONSUMER_TAG: &str = "docflow-reprocessor";
const RESTART_DELAY: Duration = Duration::from_secs(1);
/// Cap on the exponent so the shift below cannot overflow.
const MAX_BACKOFF_EXPONENT: u64 = 32;

/// What to do with one dead-lettered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// Republish to the document exchange after the given delay.
    Retry(Duration),
    /// Terminal: republish to the parking exchange.
    Park,
}

/// Parsed death history of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeathVerdict {
    Count(u64),
    /// The header exists but cannot be interpreted; park, never drop.
    Unreadable,
}

/// DLQ reprocessor with explicit lifecycle management.
pub struct DlqReprocessor {
    connection: Arc<Connection>,
    config: DlqConfig,
    metrics: Arc<PipelineMetrics>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl DlqReprocessor {
    /// Create a new reprocessor; call [`start`](Self::start) to begin
    /// draining.
    pub fn new(
        connection: Arc<Connection>,
        config: DlqConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            connection,
            config,
            metrics,
            cancellation: CancellationToken::new(),
            task_handle: None,
            join_timeout: Duration::from_secs(5),
        }
    }

    /// Start the reprocessor task.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(PipelineError::Transient("reprocessor already running".into()));
        }

        info!(
            max_retry_cycles = self.config.max_retry_cycles,
            base_delay_ms = self.config.base_delay_ms,
            max_delay_ms = self.config.max_delay_ms,
            "starting DLQ reprocessor"
        );
        self.cancellation = CancellationToken::new();

        let connection = Arc::clone(&self.connection);
        let config = self.config.clone();
        let metrics = Arc::clone(&self.metrics);
        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            Self::run(connection, config, metrics, cancel).await;
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the reprocessor. A sleep in progress is interrupted; the message
    /// being delayed stays unacknowledged and is redelivered later.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(PipelineError::Transient("reprocessor not running".into()));
        }

        info!("stopping DLQ reprocessor");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "reprocessor task panicked");
                    return Err(PipelineError::Transient("reprocessor task panicked".into()));
                }
                Err(_) => {
                    warn!("reprocessor task did not complete within timeout");
                    return Err(PipelineError::Transient("reprocessor join timeout".into()));
                }
            }
        }

        info!("DLQ reprocessor stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true when the reprocessor task is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Supervisory loop: a drain pass is fatal on broker errors; restart it
    /// with a fresh channel until cancelled.
    async fn run(
        connection: Arc<Connection>,
        config: DlqConfig,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) {
        loop {
            match Self::drain(&connection, &config, &metrics, &cancel).await {
                Ok(()) => {
                    debug!("reprocessor drain loop cancelled");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "reprocessor drain failed; restarting");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
            }
        }
    }

    /// One drain pass over the DLQ. Returns `Ok(())` only on cancellation.
    async fn drain(
        connection: &Connection,
        config: &DlqConfig,
        metrics: &PipelineMetrics,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let channel = connection.create_channel().await.map_err(map_broker_error)?;
        channel.basic_qos(1, BasicQosOptions::default()).await.map_err(map_broker_error)?;
        declare_topology(&channel).await?;

        let mut consumer = channel
            .basic_consume(
                QUEUE_DLQ,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_broker_error)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                delivery = consumer.next() => match delivery {
                    None => {
                        return Err(PipelineError::Transient("dlq consumer stream closed".into()));
                    }
                    Some(Err(e)) => return Err(map_broker_error(e)),
                    Some(Ok(delivery)) => {
                        Self::handle_message(&channel, config, metrics, cancel, delivery).await?;
                    }
                },
            }
        }
    }

    /// Schedule, republish, or park one dead-lettered message. Only broker
    /// failures propagate; everything message-shaped ends up parked.
    async fn handle_message(
        channel: &Channel,
        config: &DlqConfig,
        metrics: &PipelineMetrics,
        cancel: &CancellationToken,
        delivery: Delivery,
    ) -> Result<()> {
        let count = match death_count(delivery.properties.headers().as_ref()) {
            DeathVerdict::Count(count) => count,
            DeathVerdict::Unreadable => {
                warn!("unreadable death history; parking message");
                return Self::park(channel, metrics, &delivery).await;
            }
        };

        match decide(count, config) {
            Action::Park => {
                info!(death_count = count, "retry budget exhausted; parking message");
                Self::park(channel, metrics, &delivery).await
            }
            Action::Retry(delay) => {
                debug!(
                    death_count = count,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reprocess"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // Shutdown during the delay: exit before the publish
                        // and leave the message unacked for redelivery.
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                let _confirm = channel
                    .basic_publish(
                        EXCHANGE_DOCUMENT,
                        ROUTING_KEY_CLASSIFICATION,
                        BasicPublishOptions::default(),
                        &delivery.data,
                        delivery.properties.clone(),
                    )
                    .await
                    .map_err(map_broker_error)?;
                delivery.ack(BasicAckOptions::default()).await.map_err(map_broker_error)?;

                metrics.record_reprocessed();
                Ok(())
            }
        }
    }

    /// Republish to the parking exchange, preserving body and properties.
    async fn park(
        channel: &Channel,
        metrics: &PipelineMetrics,
        delivery: &Delivery,
    ) -> Result<()> {
        let _confirm = channel
            .basic_publish(
                EXCHANGE_PARKING,
                "",
                BasicPublishOptions::default(),
                &delivery.data,
                delivery.properties.clone(),
            )
            .await
            .map_err(map_broker_error)?;
        delivery.ack(BasicAckOptions::default()).await.map_err(map_broker_error)?;

        metrics.record_parked();
        Ok(())
    }
}

impl Drop for DlqReprocessor {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("DlqReprocessor dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}

// ============================================================================
// Pure decision helpers
// ============================================================================

/// Sum the broker's death history. Messages with no history are first-time
/// deaths; a header that exists but cannot be interpreted is unreadable.
pub(crate) fn death_count(headers: Option<&FieldTable>) -> DeathVerdict {
    let death_entry = headers.and_then(|table| {
        table.inner().iter().find(|(key, _)| key.as_str() == "x-death").map(|(_, value)| value)
    });

    let entries = match death_entry {
        None => return DeathVerdict::Count(1),
        Some(AMQPValue::FieldArray(array)) => array.as_slice(),
        Some(_) => return DeathVerdict::Unreadable,
    };

    let mut total: u64 = 0;
    for entry in entries {
        let AMQPValue::FieldTable(table) = entry else {
            return DeathVerdict::Unreadable;
        };
        let count = table.inner().iter().find(|(key, _)| key.as_str() == "count").map(|(_, v)| v);
        match count.and_then(int_value) {
            Some(n) => total = total.saturating_add(n),
            None => return DeathVerdict::Unreadable,
        }
    }

    if total == 0 {
        DeathVerdict::Count(1)
    } else {
        DeathVerdict::Count(total)
    }
}

/// `min(base * 2^(deathCount-1), max)`, saturating on overflow.
pub(crate) fn retry_delay(death_count: u64, config: &DlqConfig) -> Duration {
    let exponent = death_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT) as u32;
    let scaled = config.base_delay_ms.checked_mul(1u64 << exponent).unwrap_or(u64::MAX);
    Duration::from_millis(scaled.min(config.max_delay_ms))
}

/// Park beyond the retry budget, otherwise retry with backoff.
pub(crate) fn decide(death_count: u64, config: &DlqConfig) -> Action {
    if death_count > u64::from(config.max_retry_cycles) {
        Action::Park
    } else {
        Action::Retry(retry_delay(death_count, config))
    }
}

fn int_value(value: &AMQPValue) -> Option<u64> {
    match value {
        AMQPValue::LongLongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(u64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(u64::from(*v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use lapin::types::FieldArray;

    use super::*;

    fn config(max_retry_cycles: u32, base_delay_ms: u64, max_delay_ms: u64) -> DlqConfig {
        DlqConfig { enabled: true, max_retry_cycles, base_delay_ms, max_delay_ms }
    }

    fn death_headers(counts: &[i64]) -> FieldTable {
        let entries: Vec<AMQPValue> = counts
            .iter()
            .map(|count| {
                let mut entry = FieldTable::default();
                entry.insert("count".into(), AMQPValue::LongLongInt(*count));
                entry.insert("queue".into(), AMQPValue::LongString("queue.classification".into()));
                entry.insert("reason".into(), AMQPValue::LongString("rejected".into()));
                AMQPValue::FieldTable(entry)
            })
            .collect();

        let mut headers = FieldTable::default();
        headers.insert("x-death".into(), AMQPValue::FieldArray(FieldArray::from(entries)));
        headers
    }

    // ------------------------------------------------------------------
    // death_count
    // ------------------------------------------------------------------

    #[test]
    fn missing_history_counts_as_first_death() {
        assert_eq!(death_count(None), DeathVerdict::Count(1));

        let empty = FieldTable::default();
        assert_eq!(death_count(Some(&empty)), DeathVerdict::Count(1));
    }

    #[test]
    fn death_counts_are_summed_across_queues() {
        let headers = death_headers(&[2, 3]);
        assert_eq!(death_count(Some(&headers)), DeathVerdict::Count(5));
    }

    #[test]
    fn empty_history_array_counts_as_first_death() {
        let headers = death_headers(&[]);
        assert_eq!(death_count(Some(&headers)), DeathVerdict::Count(1));
    }

    #[test]
    fn garbled_history_is_unreadable() {
        // x-death is not an array at all.
        let mut headers = FieldTable::default();
        headers.insert("x-death".into(), AMQPValue::LongString("what".into()));
        assert_eq!(death_count(Some(&headers)), DeathVerdict::Unreadable);

        // An entry that is not a table.
        let mut headers = FieldTable::default();
        headers.insert(
            "x-death".into(),
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::Boolean(true)])),
        );
        assert_eq!(death_count(Some(&headers)), DeathVerdict::Unreadable);

        // An entry with no count field.
        let mut entry = FieldTable::default();
        entry.insert("queue".into(), AMQPValue::LongString("queue.classification".into()));
        let mut headers = FieldTable::default();
        headers.insert(
            "x-death".into(),
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(entry)])),
        );
        assert_eq!(death_count(Some(&headers)), DeathVerdict::Unreadable);
    }

    // ------------------------------------------------------------------
    // retry_delay / decide
    // ------------------------------------------------------------------

    #[test]
    fn delay_doubles_per_death_and_caps_at_max() {
        let cfg = config(10, 50, 200);
        assert_eq!(retry_delay(1, &cfg), Duration::from_millis(50));
        assert_eq!(retry_delay(2, &cfg), Duration::from_millis(100));
        assert_eq!(retry_delay(3, &cfg), Duration::from_millis(200));
        assert_eq!(retry_delay(4, &cfg), Duration::from_millis(200));
        assert_eq!(retry_delay(100, &cfg), Duration::from_millis(200));
    }

    #[test]
    fn delay_survives_overflowing_exponents() {
        let cfg = config(u32::MAX, u64::MAX / 2, u64::MAX);
        assert_eq!(retry_delay(u64::MAX, &cfg), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn backoff_and_parking_follow_the_budget() {
        // Scenario: maxRetryCycles = 2, base = 50 ms, max = 200 ms.
        let cfg = config(2, 50, 200);
        assert_eq!(decide(1, &cfg), Action::Retry(Duration::from_millis(50)));
        assert_eq!(decide(2, &cfg), Action::Retry(Duration::from_millis(100)));
        assert_eq!(decide(3, &cfg), Action::Park);
    }

    #[test]
    fn zero_retry_cycles_parks_on_first_failure() {
        let cfg = config(0, 50, 200);
        assert_eq!(decide(1, &cfg), Action::Park);
    }

    #[test]
    fn headers_to_decision_end_to_end() {
        let cfg = config(5, 1_000, 60_000);

        let headers = death_headers(&[1]);
        let DeathVerdict::Count(count) = death_count(Some(&headers)) else {
            panic!("history should be readable");
        };
        assert_eq!(decide(count, &cfg), Action::Retry(Duration::from_millis(1_000)));

        let headers = death_headers(&[4, 2]);
        let DeathVerdict::Count(count) = death_count(Some(&headers)) else {
            panic!("history should be readable");
        };
        assert_eq!(decide(count, &cfg), Action::Park);
    }
}
