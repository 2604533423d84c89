//! Wire types for the classifier protocol.

use std::collections::BTreeMap;

use docflow_domain::ClassifierVerdict;
use serde::{Deserialize, Serialize};

/// Request body for `POST /classify-with-ocr`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClassifyRequest {
    /// Document bytes, base64-encoded.
    pub content: String,
    pub mime_type: String,
}

/// Response body from the classifier.
#[derive(Debug, Deserialize)]
pub(crate) struct ClassifyResponse {
    pub classification: String,
    pub confidence: f64,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    /// Opaque OCR payload, passed through verbatim.
    #[serde(default)]
    pub ocr: Option<serde_json::Value>,
}

impl From<ClassifyResponse> for ClassifierVerdict {
    fn from(response: ClassifyResponse) -> Self {
        Self {
            classification: response.classification,
            confidence: response.confidence,
            scores: response.scores,
            ocr: response.ocr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let parsed: ClassifyResponse =
            serde_json::from_str(r#"{"classification":"invoice","confidence":0.9}"#)
                .expect("minimal response parses");
        assert_eq!(parsed.classification, "invoice");
        assert!(parsed.scores.is_empty());
        assert!(parsed.ocr.is_none());
    }

    #[test]
    fn request_serializes_camel_case() {
        let request =
            ClassifyRequest { content: "aGk=".to_string(), mime_type: "text/plain".to_string() };
        let json = serde_json::to_value(&request).expect("serializes");
        assert_eq!(json["mimeType"], "text/plain");
        assert_eq!(json["content"], "aGk=");
    }
}
