//! Request validation with accumulated per-field messages.
//!
//! Query parameters arrive as raw strings so validation owns the whole
//! parse-and-bound step; a request with several bad fields reports all of
//! them at once, keyed by field path (e.g. `".limit"`).

use std::collections::BTreeMap;

use docflow_domain::constants::UNCLASSIFIED;
use docflow_domain::storage::filename_is_safe;
use docflow_domain::{FieldErrors, PipelineError};
use uuid::Uuid;

pub const LIMIT_MIN: u32 = 1;
pub const LIMIT_MAX: u32 = 500;
pub const DEFAULT_LIMIT: u32 = 50;
const MAX_LABEL_LEN: usize = 128;

/// Accumulates field errors across a request's parameters.
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem with `field`.
    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_default().push(message.into());
    }

    /// Finish validation: `Err` with the accumulated messages if any.
    pub fn finish(self) -> Result<(), PipelineError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Validation(self.errors))
        }
    }
}

/// Parse `limit` from the raw query map; bounds per the API contract.
pub fn parse_limit(params: &BTreeMap<String, String>, validator: &mut Validator) -> u32 {
    match params.get("limit") {
        None => DEFAULT_LIMIT,
        Some(raw) => match raw.parse::<u32>() {
            Ok(value) if (LIMIT_MIN..=LIMIT_MAX).contains(&value) => value,
            _ => {
                validator
                    .error(".limit", format!("must be an integer in [{LIMIT_MIN}, {LIMIT_MAX}]"));
                DEFAULT_LIMIT
            }
        },
    }
}

/// Parse `offset` from the raw query map; must be a non-negative integer.
pub fn parse_offset(params: &BTreeMap<String, String>, validator: &mut Validator) -> u64 {
    match params.get("offset") {
        None => 0,
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                validator.error(".offset", "must be a non-negative integer");
                0
            }
        },
    }
}

/// Parse a path parameter as a document id. A malformed identifier is a
/// validation error, never a 404, and never reaches storage.
pub fn parse_document_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw)
        .map_err(|_| PipelineError::validation(".id", "must be a valid UUID"))
}

/// Validate a classification label supplied by a caller.
///
/// The `"unclassified"` sentinel is reserved: returning a document to that
/// state is the retry endpoint's job, not a correction.
pub fn validate_label(label: &str, validator: &mut Validator) {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        validator.error(".classification", "must not be empty");
    } else if trimmed.len() > MAX_LABEL_LEN {
        validator.error(".classification", format!("must be at most {MAX_LABEL_LEN} characters"));
    } else if trimmed == UNCLASSIFIED {
        validator.error(
            ".classification",
            format!("\"{UNCLASSIFIED}\" is reserved; use the retry endpoint to reset a document"),
        );
    }
}

/// Validate an uploaded filename before any storage call.
pub fn validate_filename(filename: &str, validator: &mut Validator) {
    if !filename_is_safe(filename) {
        validator.error(".file", "filename must be non-empty and contain no path separators");
    }
}

/// Extract `metadata.K=V` pairs from the raw query map.
pub fn metadata_pairs(params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("metadata.").map(|name| (name.to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn limit_bounds_are_inclusive() {
        for raw in ["1", "500"] {
            let mut v = Validator::new();
            parse_limit(&params(&[("limit", raw)]), &mut v);
            assert!(v.finish().is_ok(), "limit {raw} should be accepted");
        }
        for raw in ["0", "501", "-1", "abc", "1.5"] {
            let mut v = Validator::new();
            parse_limit(&params(&[("limit", raw)]), &mut v);
            assert!(v.finish().is_err(), "limit {raw} should be rejected");
        }
    }

    #[test]
    fn missing_limit_uses_default() {
        let mut v = Validator::new();
        assert_eq!(parse_limit(&params(&[]), &mut v), DEFAULT_LIMIT);
        assert!(v.finish().is_ok());
    }

    #[test]
    fn negative_offset_is_rejected() {
        let mut v = Validator::new();
        parse_offset(&params(&[("offset", "-1")]), &mut v);
        let err = v.finish().expect_err("negative offset rejected");
        match err {
            PipelineError::Validation(fields) => assert!(fields.contains_key(".offset")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn several_bad_fields_report_together() {
        let mut v = Validator::new();
        parse_limit(&params(&[("limit", "0"), ("offset", "-1")]), &mut v);
        parse_offset(&params(&[("limit", "0"), ("offset", "-1")]), &mut v);
        match v.finish().expect_err("both rejected") {
            PipelineError::Validation(fields) => {
                assert!(fields.contains_key(".limit"));
                assert!(fields.contains_key(".offset"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn document_id_must_be_a_uuid() {
        assert!(parse_document_id("not-a-uuid").is_err());
        assert!(parse_document_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[test]
    fn labels_are_trimmed_and_bounded() {
        let mut v = Validator::new();
        validate_label("contract", &mut v);
        assert!(v.finish().is_ok());

        let mut v = Validator::new();
        validate_label("   ", &mut v);
        assert!(v.finish().is_err());

        let mut v = Validator::new();
        validate_label(&"x".repeat(200), &mut v);
        assert!(v.finish().is_err());
    }

    #[test]
    fn the_unclassified_sentinel_is_reserved() {
        for label in ["unclassified", "  unclassified  "] {
            let mut v = Validator::new();
            validate_label(label, &mut v);
            match v.finish().expect_err("reserved label rejected") {
                PipelineError::Validation(fields) => {
                    assert!(fields.contains_key(".classification"));
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn metadata_pairs_strip_their_prefix() {
        let pairs = metadata_pairs(&params(&[
            ("metadata.client", "acme"),
            ("metadata.year", "2026"),
            ("limit", "10"),
        ]));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.get("client").map(String::as_str), Some("acme"));
        assert_eq!(pairs.get("year").map(String::as_str), Some("2026"));
    }
}
