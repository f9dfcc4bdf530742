//! Helpers for picking fields out of loosely-typed JSON API responses.

use serde_json::Value;

/// Navigates a dot-separated path into a [`Value`]. Numeric segments index
/// into arrays.
#[must_use]
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => current.get(segment)?,
        };
    }
    Some(current)
}

/// Non-empty string (or number rendered as a string) at `path`.
#[must_use]
pub fn str_at(value: &Value, path: &str) -> Option<String> {
    match resolve_path(value, path)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unsigned integer at `path`, accepting numeric strings.
#[must_use]
pub fn u64_at(value: &Value, path: &str) -> Option<u64> {
    match resolve_path(value, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strings at `path`: an array of strings, a single string, or nothing.
#[must_use]
pub fn strings_at(value: &Value, path: &str) -> Vec<String> {
    match resolve_path(value, path) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
            .map(String::from)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Array at `path`, or an empty slice.
#[must_use]
pub fn array_at<'a>(value: &'a Value, path: &str) -> &'a [Value] {
    resolve_path(value, path)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolves_nested_paths_and_indices() {
        let v = json!({"messages": [{"total": "250"}], "hits": {"hits": [1, 2]}});
        assert_eq!(u64_at(&v, "messages.0.total"), Some(250));
        assert_eq!(array_at(&v, "hits.hits").len(), 2);
        assert!(resolve_path(&v, "messages.5").is_none());
    }

    #[test]
    fn str_at_skips_blank_and_renders_numbers() {
        let v = json!({"a": "  ", "b": 42, "c": " x "});
        assert_eq!(str_at(&v, "a"), None);
        assert_eq!(str_at(&v, "b").as_deref(), Some("42"));
        assert_eq!(str_at(&v, "c").as_deref(), Some("x"));
    }

    #[test]
    fn strings_at_accepts_scalar_or_array() {
        let v = json!({"one": "x", "many": ["a", "", "b"]});
        assert_eq!(strings_at(&v, "one"), vec!["x"]);
        assert_eq!(strings_at(&v, "many"), vec!["a", "b"]);
        assert!(strings_at(&v, "none").is_empty());
    }
}
