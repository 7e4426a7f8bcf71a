//! Secret redaction applied at every logging/streaming boundary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub const REDACTED: &str = "***REDACTED***";

const SENSITIVE_FRAGMENTS: &[&str] = &["key", "token", "secret", "password", "credential", "auth"];

static ENV_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD|CREDENTIAL|AUTH)[A-Z0-9_]*)=(\S+)")
        .expect("static regex")
});

/// True when a map key or variable name looks like it carries a secret.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// Replaces values under sensitive keys, recursively.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => redact_map(map),
        Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        Value::String(text) => {
            if ENV_ASSIGNMENT.is_match(text) {
                *text = redact_text(text);
            }
        }
        _ => {}
    }
}

pub fn redact_map(map: &mut Map<String, Value>) {
    for (key, value) in map.iter_mut() {
        if is_sensitive_key(key) {
            *value = Value::String(REDACTED.to_string());
        } else {
            redact_value(value);
        }
    }
}

#[must_use]
pub fn redacted(mut value: Value) -> Value {
    redact_value(&mut value);
    value
}

/// Masks `NAME=value` pairs whose name looks sensitive inside free text.
pub fn redact_text(text: &str) -> String {
    ENV_ASSIGNMENT
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{}={REDACTED}", &caps[1])
        })
        .into_owned()
}
