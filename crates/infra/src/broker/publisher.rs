//! AMQP implementation of the job publisher port.

use async_trait::async_trait;
use docflow_core::JobPublisher;
use docflow_domain::constants::{EXCHANGE_DOCUMENT, ROUTING_KEY_CLASSIFICATION};
use docflow_domain::{DocumentMessage, Result};
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection};
use tracing::debug;

use super::topology::declare_topology;
use crate::errors::map_broker_error;

/// Persistent delivery mode per AMQP 0-9-1.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Publishes classification jobs to the document exchange.
pub struct AmqpJobPublisher {
    channel: Channel,
}

impl AmqpJobPublisher {
    /// Create a publisher on its own channel, declaring the topology.
    pub async fn new(connection: &Connection) -> Result<Self> {
        let channel = connection.create_channel().await.map_err(map_broker_error)?;
        declare_topology(&channel).await?;
        Ok(Self { channel })
    }
}

#[async_trait]
impl JobPublisher for AmqpJobPublisher {
    async fn publish(&self, message: &DocumentMessage) -> Result<()> {
        let payload = message.to_bytes()?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let _confirm = self
            .channel
            .basic_publish(
                EXCHANGE_DOCUMENT,
                ROUTING_KEY_CLASSIFICATION,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(map_broker_error)?;

        debug!(
            document_id = %message.document_id,
            correlation_id = message.correlation_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            "classification job published"
        );
        Ok(())
    }
}
