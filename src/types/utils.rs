//! Shared utility functions for type serialization and common operations.
//!
//! ## JSON Extraction Helpers
//!
//! Provides ergonomic helpers for extracting values from `serde_json::Value`:
//! - `json_string` - Extract strings
//! - `json_string_array` - Extract string arrays
//! - `json_f64` - Extract numbers, accepting numeric strings

use std::fmt::Display;

// =============================================================================
// JSON Value Extraction Helpers
// =============================================================================

/// Extract string from JSON value by key.
#[inline]
pub fn json_string(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(String::from)
}

/// Extract string array from JSON value by key.
///
/// Non-string items are rendered with their JSON text.
pub fn json_string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|s| match s.as_str() {
                    Some(text) => text.to_string(),
                    None => s.to_string(),
                })
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Extract f64 by key. Numeric strings such as `"72"` or `"72.5%"` count.
pub fn json_f64(value: &serde_json::Value, key: &str) -> Option<f64> {
    let v = value.get(key)?;
    v.as_f64().or_else(|| {
        v.as_str()
            .and_then(|s| s.trim().trim_end_matches('%').trim().parse::<f64>().ok())
    })
}

/// A value is "present" when it is not null, not an empty string and not an empty container.
pub fn json_is_present(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.trim().is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

// =============================================================================
// String Utilities
// =============================================================================

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

// =============================================================================
// Type Parsing
// =============================================================================

/// Trait for parsing strings into enum types with a default fallback.
/// Used for deserializing database values where invalid strings should fall back gracefully.
/// Logs a warning when an invalid value is encountered.
pub trait ParseWithDefault: Sized {
    /// The name of this type for logging purposes.
    fn type_name() -> &'static str;

    /// The default value to use when parsing fails.
    fn default_value() -> Self;

    /// Try to parse the string, returning None if invalid.
    fn try_parse(s: &str) -> Option<Self>;

    /// Parse a string into this type, returning a default value if parsing fails.
    /// Logs a warning for invalid values to help detect data corruption.
    fn parse_or_default(s: &str) -> Self {
        match Self::try_parse(s) {
            Some(v) => v,
            None => {
                tracing::warn!("Invalid {} value '{}', using default", Self::type_name(), s);
                Self::default_value()
            }
        }
    }
}

/// Filter an iterator of Results, logging errors at debug level before discarding.
///
/// Use this instead of `.filter_map(|r| r.ok())` when you want visibility into
/// what errors are being discarded.
pub fn log_filter_error<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("{}: {}", context, e);
            None
        }
    }
}

/// Like log_filter_error but logs at warn level for more important operations.
pub fn log_filter_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_f64_accepts_numeric_strings() {
        let value = json!({"a": 12.5, "b": "72", "c": "65.5%", "d": "n/a"});
        assert_eq!(json_f64(&value, "a"), Some(12.5));
        assert_eq!(json_f64(&value, "b"), Some(72.0));
        assert_eq!(json_f64(&value, "c"), Some(65.5));
        assert_eq!(json_f64(&value, "d"), None);
        assert_eq!(json_f64(&value, "missing"), None);
    }

    #[test]
    fn test_json_string_array_skips_blank() {
        let value = json!({"items": ["one", "", 3, "  "]});
        assert_eq!(json_string_array(&value, "items"), vec!["one", "3"]);
        assert!(json_string_array(&value, "missing").is_empty());
    }

    #[test]
    fn test_json_is_present() {
        assert!(!json_is_present(&json!(null)));
        assert!(!json_is_present(&json!("  ")));
        assert!(!json_is_present(&json!([])));
        assert!(!json_is_present(&json!({})));
        assert!(json_is_present(&json!(0)));
        assert!(json_is_present(&json!([1])));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("平安银行股份", 4), "平安银行…");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_log_filter_error() {
        let ok: Result<u8, String> = Ok(1);
        let err: Result<u8, String> = Err("bad".into());
        assert_eq!(log_filter_error(ok, "ctx"), Some(1));
        assert_eq!(log_filter_warn(err, "ctx"), None);
    }
}
