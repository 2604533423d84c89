//! The document entity and classification value types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::UNCLASSIFIED;

/// Provenance of the current classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    /// Written by the worker from a model verdict.
    Ml,
    /// Written by a human correction; protected against ML overwrites.
    Manual,
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ml => write!(f, "ml"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for ClassificationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ml" => Ok(Self::Ml),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown classification source: {other}")),
        }
    }
}

/// The central entity: one uploaded document and its classification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Assigned at upload, immutable.
    pub id: Uuid,
    /// Blob-store key, relative to the configured root. Immutable after
    /// insert.
    pub storage_path: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size_bytes: i64,
    /// `"unclassified"` until a verdict lands.
    pub classification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Full zero-shot score vector; when present it contains
    /// `classification` as a key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_scores: Option<BTreeMap<String, f64>>,
    pub classification_source: ClassificationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_storage_path: Option<String>,
    /// Opaque user tags, searchable by exact containment.
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Whether no verdict (automatic or manual) has been recorded yet.
    pub fn is_unclassified(&self) -> bool {
        self.classification == UNCLASSIFIED
    }
}

/// Insert payload for [`Document`]; the repository assigns the
/// classification defaults and timestamps.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Uuid,
    pub storage_path: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size_bytes: i64,
    pub metadata: BTreeMap<String, String>,
}

/// Verdict payload for the repository's conditional ML update.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationUpdate {
    pub classification: String,
    pub confidence: f64,
    pub ocr_storage_path: Option<String>,
    pub label_scores: Option<BTreeMap<String, f64>>,
}

/// Parsed response from the external classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierVerdict {
    pub classification: String,
    pub confidence: f64,
    pub scores: BTreeMap<String, f64>,
    /// Opaque OCR payload, persisted verbatim when present.
    pub ocr: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_source_round_trips_via_str() {
        for source in [ClassificationSource::Ml, ClassificationSource::Manual] {
            let parsed: ClassificationSource =
                source.to_string().parse().expect("round trip parses");
            assert_eq!(parsed, source);
        }
        assert!("robot".parse::<ClassificationSource>().is_err());
    }

    #[test]
    fn document_serializes_camel_case() {
        let doc = Document {
            id: Uuid::new_v4(),
            storage_path: "2026/08/01/x.pdf".into(),
            original_filename: "x.pdf".into(),
            mime_type: "application/pdf".into(),
            file_size_bytes: 1024,
            classification: UNCLASSIFIED.into(),
            confidence: None,
            label_scores: None,
            classification_source: ClassificationSource::Ml,
            ocr_storage_path: None,
            metadata: BTreeMap::new(),
            corrected_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(&doc).expect("serializes");
        assert!(value.get("storagePath").is_some());
        assert!(value.get("fileSizeBytes").is_some());
        assert_eq!(value["classificationSource"], "ml");
        // Absent optionals are omitted, not null.
        assert!(value.get("confidence").is_none());
    }
}
