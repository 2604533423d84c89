//! Shared constants: queue topology names and well-known sentinels.

/// Classification value assigned at upload and restored by a reset.
pub const UNCLASSIFIED: &str = "unclassified";

/// Durable topic exchange that receives classification jobs.
pub const EXCHANGE_DOCUMENT: &str = "exchange.document";

/// Fanout dead-letter exchange bound to [`QUEUE_DLQ`].
pub const EXCHANGE_DLX: &str = "exchange.dlx";

/// Fanout exchange feeding the terminal parking lot.
pub const EXCHANGE_PARKING: &str = "exchange.parking";

/// Primary work queue consumed by the classification worker.
pub const QUEUE_CLASSIFICATION: &str = "queue.classification";

/// Dead-letter queue drained by the reprocessor.
pub const QUEUE_DLQ: &str = "queue.dlq";

/// Terminal sink for messages that exhausted their retry budget.
pub const QUEUE_PARKING: &str = "queue.parking";

/// Routing key binding [`EXCHANGE_DOCUMENT`] to [`QUEUE_CLASSIFICATION`].
pub const ROUTING_KEY_CLASSIFICATION: &str = "classification";

/// HTTP header carrying the correlation id on inbound and outbound calls.
pub const CORRELATION_HEADER: &str = "X-Request-Id";
