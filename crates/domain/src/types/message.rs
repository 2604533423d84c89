//! Queue message payload and correlation id.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};

/// Opaque identifier minted at the API edge and threaded through logs, queue
/// messages, and the classifier call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh correlation id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What the consumer should do with the referenced document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    Classify,
}

/// Wire payload published to the document exchange.
///
/// Unknown additional fields are accepted for forward compatibility; bodies
/// that do not parse at all are terminal and never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMessage {
    pub document_id: Uuid,
    pub action: MessageAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl DocumentMessage {
    /// Build a classification job for `document_id`.
    pub fn classify(document_id: Uuid, correlation_id: Option<CorrelationId>) -> Self {
        Self { document_id, action: MessageAction::Classify, correlation_id }
    }

    /// Parse a message body. Failures are integrity errors: a malformed
    /// payload cannot succeed on retry.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::Integrity(format!("unparseable message body: {e}")))
    }

    /// Serialize for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| PipelineError::Integrity(format!("unserializable message: {e}")))
    }
}
