//! Recovery of the JSON result block from noisy test-framework output.
//!
//! The framework prints coverage banners, deprecation notices and other chatter
//! around the one JSON object we care about. The custom formatter wraps that
//! object in `START_OF_TEST_JSON` / `END_OF_TEST_JSON`, and this module is the
//! only place that knows about those markers.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ExplorerError;

/// Marker printed immediately before the JSON payload.
pub const START_SENTINEL: &str = "START_OF_TEST_JSON";

/// Marker printed immediately after the JSON payload.
pub const END_SENTINEL: &str = "END_OF_TEST_JSON";

/// Maximum number of raw characters quoted in log lines.
const LOG_PREVIEW_LEN: usize = 500;

/// The object emitted by the formatter.
#[derive(Debug, Clone, Deserialize)]
pub struct Payload<T> {
    #[serde(default = "Vec::new")]
    pub examples: Vec<T>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Returns true when a line carries the start of the payload.
pub fn contains_payload(line: &str) -> bool {
    line.contains(START_SENTINEL)
}

/// Extracts the sentinel-delimited JSON object from `output`.
///
/// Returns the text from the `{` following the first start sentinel up to
/// and including the `}` preceding the last end sentinel.
pub fn extract_json(output: &str) -> Result<&str, ExplorerError> {
    let start_marker = format!("{START_SENTINEL}{{");
    let end_marker = format!("}}{END_SENTINEL}");

    let start = output
        .find(&start_marker)
        .map(|idx| idx + START_SENTINEL.len())
        .ok_or_else(|| ExplorerError::malformed("start sentinel not found", output))?;
    let end = output
        .rfind(&end_marker)
        .map(|idx| idx + 1)
        .ok_or_else(|| ExplorerError::malformed("end sentinel not found", output))?;

    if end <= start {
        return Err(ExplorerError::malformed(
            "end sentinel precedes start sentinel",
            output,
        ));
    }

    Ok(&output[start..end])
}

/// Extracts and deserializes the payload in one step.
pub fn parse_payload<T: DeserializeOwned>(output: &str) -> Result<Payload<T>, ExplorerError> {
    let json = extract_json(output)?;
    tracing::debug!(json = %preview(json), "parsing test payload");
    serde_json::from_str(json).map_err(|e| {
        ExplorerError::malformed(format!("invalid test payload JSON: {e}"), output)
    })
}

/// Best-effort lookup of the formatter's `messages` list, used for diagnostics.
pub fn messages_from_output(output: &str) -> Option<Vec<String>> {
    let json = extract_json(output).ok()?;
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let messages = value.get("messages")?.as_array()?;
    Some(
        messages
            .iter()
            .filter_map(|m| m.as_str().map(str::to_string))
            .collect(),
    )
}

/// Shortens raw output for log lines.
pub(crate) fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_surrounded_by_noise() {
        let json = r#"{"examples":[{"id":"a"}],"messages":[]}"#;
        let output = format!(
            "Coverage report generated\nDEPRECATION: foo\n{START_SENTINEL}{json}{END_SENTINEL}\nFinished in 0.1s"
        );
        assert_eq!(extract_json(&output).unwrap(), json);
    }

    #[test]
    fn test_extract_uses_first_start_and_last_end() {
        let output = format!(
            "{START_SENTINEL}{{\"a\":1}}{END_SENTINEL} junk {START_SENTINEL}{{\"b\":2}}{END_SENTINEL}"
        );
        let extracted = extract_json(&output).unwrap();
        assert!(extracted.starts_with("{\"a\":1}"));
        assert!(extracted.ends_with("{\"b\":2}"));
    }

    #[test]
    fn test_missing_sentinels_are_malformed() {
        let err = extract_json(r#"{"examples":[]}END_OF_TEST_JSON"#).unwrap_err();
        assert!(matches!(err, ExplorerError::MalformedOutput { .. }));

        let err = extract_json(r#"START_OF_TEST_JSON{"examples":[]}"#).unwrap_err();
        assert!(matches!(err, ExplorerError::MalformedOutput { .. }));

        // Sentinel present but not followed by an object.
        let err = extract_json("START_OF_TEST_JSON [] END_OF_TEST_JSON").unwrap_err();
        assert!(matches!(err, ExplorerError::MalformedOutput { .. }));
    }

    #[test]
    fn test_out_of_order_sentinels_are_malformed() {
        let output = format!("}}{END_SENTINEL} then {START_SENTINEL}{{");
        assert!(extract_json(&output).is_err());
    }

    #[test]
    fn test_parse_payload_invalid_json_keeps_raw() {
        let output = format!("{START_SENTINEL}{{not json}}{END_SENTINEL}");
        match parse_payload::<serde_json::Value>(&output) {
            Err(ExplorerError::MalformedOutput { raw, .. }) => assert_eq!(raw, output),
            other => panic!("expected malformed output, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_payload_defaults_missing_lists() {
        let output = format!("{START_SENTINEL}{{}}{END_SENTINEL}");
        let payload = parse_payload::<serde_json::Value>(&output).unwrap();
        assert!(payload.examples.is_empty());
        assert!(payload.messages.is_empty());
    }

    #[test]
    fn test_messages_from_output() {
        let output = format!(
            "{START_SENTINEL}{{\"examples\":[],\"messages\":[\"boom\"]}}{END_SENTINEL}"
        );
        assert_eq!(messages_from_output(&output), Some(vec!["boom".to_string()]));
        assert_eq!(messages_from_output("nothing here"), None);
    }
}
