//! Redaction helper — strips known-sensitive values and well-known
//! sensitive keys from strings and maps before they reach a log record.

use std::collections::HashMap;

/// Map keys whose values are always replaced with `***` regardless of
/// content, matched case-insensitively.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "bearer",
    "access_token",
    "refresh_token",
    "private_key",
];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

/// Replace every occurrence of `value` in `text` with `***`. No-op for an
/// empty or whitespace-only `value` (which would otherwise redact
/// everything).
pub fn redact_value(text: &str, value: &str) -> String {
    if value.trim().is_empty() {
        return text.to_string();
    }
    text.replace(value, "***")
}

/// Redact every entry in `known_values` out of `text`, in order.
pub fn redact_known(text: &str, known_values: &[&str]) -> String {
    let mut out = text.to_string();
    for value in known_values {
        out = redact_value(&out, value);
    }
    out
}

/// Redact a string-keyed map in place for logging: values under a
/// sensitive-looking key become `***`; everything else passes through
/// after also being scrubbed of any `known_values`.
pub fn redact_map(map: &HashMap<String, String>, known_values: &[&str]) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let value = if is_sensitive_key(k) {
                "***".to_string()
            } else {
                redact_known(v, known_values)
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_known_value() {
        assert_eq!(redact_value("key=sk-abc123", "sk-abc123"), "key=***");
    }

    #[test]
    fn ignores_empty_value() {
        assert_eq!(redact_value("hello", ""), "hello");
    }

    #[test]
    fn redacts_sensitive_keys_in_map() {
        let mut map = HashMap::new();
        map.insert("FINNHUB_TOKEN".to_string(), "abc123".to_string());
        map.insert("NODE_ENV".to_string(), "production".to_string());
        let redacted = redact_map(&map, &[]);
        assert_eq!(redacted.get("FINNHUB_TOKEN").unwrap(), "***");
        assert_eq!(redacted.get("NODE_ENV").unwrap(), "production");
    }

    #[test]
    fn redacts_known_values_in_non_sensitive_key() {
        let mut map = HashMap::new();
        map.insert("MESSAGE".to_string(), "leaked sk-XYZ here".to_string());
        let redacted = redact_map(&map, &["sk-XYZ"]);
        assert_eq!(redacted.get("MESSAGE").unwrap(), "leaked *** here");
    }
}
