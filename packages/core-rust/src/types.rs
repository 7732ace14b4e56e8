use std::collections::HashMap;

/// Structured value carried in payloads and measure metadata.
///
/// The engine does not define its own value enum: requests arrive as JSON and
/// leave as JSON, so `serde_json::Value` is the natural representation.
pub use serde_json::Value;

/// Keyword input and output payload: an ordered JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Caller- or environment-supplied configuration values.
pub type Properties = HashMap<String, String>;

/// Free-form metadata attached to a measure.
pub type MeasureData = HashMap<String, Value>;

/// Renders a payload value as the text used for placeholder substitution.
///
/// Strings are returned verbatim (no surrounding quotes); every other value
/// uses its compact JSON rendering, so `42` becomes `"42"` and `true`
/// becomes `"true"`.
#[must_use]
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
