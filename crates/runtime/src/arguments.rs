//! Tool-call argument decoding.

use serde_json::{Map, Value};
use tracing::warn;

/// Decode a model-supplied argument payload into a key/value mapping.
///
/// Providers send arguments either as a JSON object or as text containing
/// one. Anything that does not yield an object decodes to an empty mapping,
/// so a malformed payload becomes a no-argument call rather than an error.
pub fn decode_arguments(raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::String(text) => parse_text(text),
        Value::Null => Map::new(),
        other => {
            warn!(payload = %other, "tool arguments are not an object, using none");
            Map::new()
        }
    }
}

fn parse_text(text: &str) -> Map<String, Value> {
    if text.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(payload = %other, "tool arguments are not an object, using none");
            Map::new()
        }
        Err(e) => {
            warn!(error = %e, payload = text, "malformed tool arguments, using none");
            Map::new()
        }
    }
}
