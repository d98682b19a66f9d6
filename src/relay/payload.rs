use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};

/// Canonical text form of a payload for NOTIFY.
///
/// Strings are sent verbatim; every other value is compact JSON. Object keys
/// come out sorted, so equal values always produce the same text.
pub fn encode(payload: &Value) -> Result<String, serde_json::Error> {
    match payload {
        Value::String(text) => Ok(text.clone()),
        other => serde_json::to_string(other),
    }
}

/// Decode upstream notification text.
///
/// Text that is not JSON is wrapped as `{"message": text}` so a malformed
/// notification is still delivered. An empty payload decodes to `{}`.
pub fn decode(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "message": raw }))
}

/// Current time as an RFC 3339 UTC string with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
