//! Queue topology declaration.
//!
//! Publisher and consumer sides declare the identical durable topology; the
//! declarations are idempotent so either side can start first.
//!
//! - `exchange.document` (topic) --`classification`--> `queue.classification`
//! - `queue.classification` dead-letters into `exchange.dlx` (fanout), which
//!   feeds `queue.dlq`
//! - `exchange.parking` (fanout) feeds `queue.parking`, the terminal sink

use docflow_domain::constants::{
    EXCHANGE_DLX, EXCHANGE_DOCUMENT, EXCHANGE_PARKING, QUEUE_CLASSIFICATION, QUEUE_DLQ,
    QUEUE_PARKING, ROUTING_KEY_CLASSIFICATION,
};
use docflow_domain::{BrokerConfig, Result};
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::info;

use crate::errors::map_broker_error;

/// Open a broker connection from configuration.
pub async fn connect_broker(config: &BrokerConfig) -> Result<Connection> {
    let uri = config.amqp_uri();
    let connection = Connection::connect(&uri, ConnectionProperties::default())
        .await
        .map_err(map_broker_error)?;
    info!(host = %config.host, port = config.port, "broker connection established");
    Ok(connection)
}

/// Declare the full exchange/queue graph on `channel`.
pub async fn declare_topology(channel: &Channel) -> Result<()> {
    let durable_exchange = ExchangeDeclareOptions { durable: true, ..Default::default() };
    let durable_queue = QueueDeclareOptions { durable: true, ..Default::default() };

    channel
        .exchange_declare(
            EXCHANGE_DOCUMENT,
            ExchangeKind::Topic,
            durable_exchange,
            FieldTable::default(),
        )
        .await
        .map_err(map_broker_error)?;
    channel
        .exchange_declare(EXCHANGE_DLX, ExchangeKind::Fanout, durable_exchange, FieldTable::default())
        .await
        .map_err(map_broker_error)?;
    channel
        .exchange_declare(
            EXCHANGE_PARKING,
            ExchangeKind::Fanout,
            durable_exchange,
            FieldTable::default(),
        )
        .await
        .map_err(map_broker_error)?;

    let mut classification_args = FieldTable::default();
    classification_args
        .insert("x-dead-letter-exchange".into(), AMQPValue::LongString(EXCHANGE_DLX.into()));
    channel
        .queue_declare(QUEUE_CLASSIFICATION, durable_queue, classification_args)
        .await
        .map_err(map_broker_error)?;
    channel
        .queue_declare(QUEUE_DLQ, durable_queue, FieldTable::default())
        .await
        .map_err(map_broker_error)?;
    channel
        .queue_declare(QUEUE_PARKING, durable_queue, FieldTable::default())
        .await
        .map_err(map_broker_error)?;

    channel
        .queue_bind(
            QUEUE_CLASSIFICATION,
            EXCHANGE_DOCUMENT,
            ROUTING_KEY_CLASSIFICATION,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(map_broker_error)?;
    channel
        .queue_bind(QUEUE_DLQ, EXCHANGE_DLX, "", QueueBindOptions::default(), FieldTable::default())
        .await
        .map_err(map_broker_error)?;
    channel
        .queue_bind(
            QUEUE_PARKING,
            EXCHANGE_PARKING,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(map_broker_error)?;

    Ok(())
}
