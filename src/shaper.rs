//! Pure helpers for turning raw backend payloads into response fields.
//!
//! Every response kind keeps a fixed field set; anything missing from the
//! payload falls back to an empty value rather than being omitted.

use std::{fs, io, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;

use crate::bridge::effective_error;

pub const BASE64_ENCODING: &str = "base64";

/// Returns the effective error when the payload reports failure.
///
/// A payload fails when `success` is `false` or `error` is non-empty. Without
/// a direct error string the last `trace` entry stands in for it.
pub fn backend_error(payload: &Value) -> Option<String> {
    let success = payload.get("success").and_then(Value::as_bool);
    let error = string_field(payload, "error");

    if success != Some(false) && error.is_empty() {
        return None;
    }

    Some(effective_error(&error, &string_list(payload, "trace")))
}

pub fn string_field(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn string_list(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn number_list(payload: &Value, key: &str) -> Vec<f64> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

pub fn value_list(payload: &Value, key: &str) -> Vec<Value> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

pub fn number_field(payload: &Value, key: &str) -> f64 {
    payload.get(key).and_then(Value::as_f64).unwrap_or_default()
}

/// A backend artifact packaged for the response body.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedArtifact {
    pub payload: String,
    pub basename: String,
    pub encoding: String,
}

/// Reads `path`, encodes it, and deletes it. The response is left as the
/// only copy of the data.
pub fn package_artifact(path: &Path) -> io::Result<EncodedArtifact> {
    let bytes = fs::read(path)?;
    let basename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    fs::remove_file(path)?;

    Ok(EncodedArtifact {
        payload: STANDARD.encode(bytes),
        basename,
        encoding: BASE64_ENCODING.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PLATFORM_FAILURE;
    use serde_json::json;

    #[test]
    fn trace_fallback_uses_most_recent_entry() {
        let payload = json!({"success": false, "error": "", "trace": ["a", "b", "c"]});
        assert_eq!(backend_error(&payload).as_deref(), Some("c"));
    }

    #[test]
    fn success_without_error_is_not_a_failure() {
        assert_eq!(backend_error(&json!({"success": true, "error": ""})), None);
        assert_eq!(backend_error(&json!({"error": ""})), None);
        assert_eq!(backend_error(&json!({})), None);
    }

    #[test]
    fn error_string_marks_failure_even_without_success_flag() {
        assert_eq!(
            backend_error(&json!({"error": "espeak failed"})).as_deref(),
            Some("espeak failed")
        );
    }

    #[test]
    fn bare_failure_reads_as_platform_failure() {
        assert_eq!(
            backend_error(&json!({"success": false})).as_deref(),
            Some(PLATFORM_FAILURE)
        );
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let payload = json!({"words": ["yes", 3, "no"], "scores": [0.5, "x"]});
        assert_eq!(string_list(&payload, "words"), vec!["yes", "no"]);
        assert_eq!(number_list(&payload, "scores"), vec![0.5]);
        assert!(string_list(&payload, "absent").is_empty());
        assert_eq!(string_field(&payload, "absent"), "");
        assert_eq!(number_field(&payload, "absent"), 0.0);
    }

    #[test]
    fn packaged_artifact_is_removed_from_disk() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("tts_ABCDE.wav");
        fs::write(&path, b"RIFF").expect("write artifact");

        let artifact = package_artifact(&path).expect("package artifact");
        assert_eq!(artifact.payload, "UklGRg==");
        assert_eq!(artifact.basename, "tts_ABCDE.wav");
        assert_eq!(artifact.encoding, BASE64_ENCODING);
        assert!(!path.exists());
    }
}
