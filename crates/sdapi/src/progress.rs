//! Progress endpoint response handling.

use serde_json::Value;

/// One poll of the backend progress endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// HTTP status of the progress response.
    pub status: u16,
    /// The `progress` field rendered as text.
    pub progress: String,
}

/// Extract the top-level `progress` field from a progress response body.
///
/// Strings are returned verbatim, numbers and booleans in their JSON text
/// form, nested values as compact JSON. A missing field, `null`, or a
/// body that is not a JSON object yields an empty string.
pub fn parse_progress_field(body: &str) -> String {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };

    match value.get("progress") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
