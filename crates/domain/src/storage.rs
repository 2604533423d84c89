//! Blob-key derivation.
//!
//! Keys are relative paths under the configured blob root. The same pure
//! functions are used by the upload handler and the worker so the two sides
//! always agree on where a document's bytes and OCR artifact live.
//!
//! Layout:
//! - document bytes: `{yyyy}/{MM}/{dd}/{id}.{ext}`
//! - OCR artifact: `{id}-ocr/ocr-results.json`

use chrono::{DateTime, Utc};
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 16;

/// Relative key for a document's raw bytes, dated by upload time.
pub fn document_blob_key(id: Uuid, original_filename: &str, uploaded_at: DateTime<Utc>) -> String {
    format!("{}/{}.{}", uploaded_at.format("%Y/%m/%d"), id, extension_of(original_filename))
}

/// Relative key for a document's OCR artifact.
pub fn ocr_blob_key(id: Uuid) -> String {
    format!("{id}-ocr/ocr-results.json")
}

/// Whether an uploaded filename is acceptable as-is.
///
/// Path separators are rejected before any storage call; the filename is
/// only ever used for its extension and for display.
pub fn filename_is_safe(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

/// Lowercased alphanumeric extension of `name`, or `bin` when absent or
/// unusable.
fn extension_of(name: &str) -> String {
    let ext = name.rsplit_once('.').map(|(stem, ext)| (stem, ext.to_ascii_lowercase()));
    match ext {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn document_key_uses_dated_layout_and_extension() {
        let id = Uuid::parse_str("0b7f3a3e-7b0a-4f4e-9c9a-6a5d4c3b2a10").expect("uuid");
        let key = document_blob_key(id, "Report.PDF", ts());
        assert_eq!(key, format!("2026/08/01/{id}.pdf"));
    }

    #[test]
    fn document_key_defaults_to_bin_for_odd_filenames() {
        let id = Uuid::new_v4();
        for name in ["README", "archive.tar.gz!!", ".hidden", "noext."] {
            let key = document_blob_key(id, name, ts());
            assert!(key.ends_with(".bin"), "{name} should map to .bin, got {key}");
        }
    }

    #[test]
    fn tar_gz_keeps_final_extension() {
        let id = Uuid::new_v4();
        let key = document_blob_key(id, "archive.tar.gz", ts());
        assert!(key.ends_with(".gz"));
    }

    #[test]
    fn ocr_key_is_derived_from_id() {
        let id = Uuid::parse_str("0b7f3a3e-7b0a-4f4e-9c9a-6a5d4c3b2a10").expect("uuid");
        assert_eq!(ocr_blob_key(id), format!("{id}-ocr/ocr-results.json"));
    }

    #[test]
    fn filenames_with_separators_are_rejected() {
        assert!(filename_is_safe("report.pdf"));
        assert!(filename_is_safe("weird name (1).pdf"));
        assert!(!filename_is_safe("a/b.pdf"));
        assert!(!filename_is_safe("a\\b.pdf"));
        assert!(!filename_is_safe(""));
        assert!(!filename_is_safe(".."));
    }
}
