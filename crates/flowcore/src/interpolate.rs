//! `{{port.path}}` placeholder resolution for executor configuration.
//!
//! The engine never calls this; executors opt in when their config may
//! reference upstream values.

use crate::DEFAULT_PORT;
use serde_json::{Map, Value};

/// Resolve every placeholder in `template` against a node's keyed input.
///
/// A string consisting of a single placeholder is replaced by the
/// referenced value itself; placeholders embedded in longer strings are
/// rendered as text. Unresolvable placeholders are left untouched.
pub fn interpolate(template: &Value, input: &Map<String, Value>) -> Value {
    match template {
        Value::String(s) => interpolate_str(s, input),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, input)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), interpolate(v, input)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Look up a dotted path such as `default.user.name` or `items.0`.
///
/// Paths whose first segment is not a port fall back to the default port.
pub fn lookup<'a>(input: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    let (first, rest) = segments.split_first()?;
    match input.get(*first) {
        Some(root) => walk(root, rest),
        None => walk(input.get(DEFAULT_PORT)?, &segments),
    }
}

fn walk<'a>(mut current: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn interpolate_str(s: &str, input: &Map<String, Value>) -> Value {
    let trimmed = s.trim();
    if let Some(expr) = sole_placeholder(trimmed) {
        return lookup(input, expr)
            .cloned()
            .unwrap_or_else(|| Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let expr = &rest[open + 2..open + 2 + close];
        out.push_str(&rest[..open]);
        match lookup(input, expr.trim()) {
            Some(Value::String(text)) => out.push_str(text),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[open..open + close + 4]),
        }
        rest = &rest[open + close + 4..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "default": {"user": {"name": "Ada", "tags": ["a", "b"]}, "count": 3},
            "extra": "side"
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn sole_placeholder_keeps_type() {
        assert_eq!(interpolate(&json!("{{default.count}}"), &input()), json!(3));
        assert_eq!(interpolate(&json!("{{ user.tags }}"), &input()), json!(["a", "b"]));
    }

    #[test]
    fn embedded_placeholders_render_as_text() {
        let out = interpolate(&json!("Hi {{user.name}} ({{extra}}), n={{count}}"), &input());
        assert_eq!(out, json!("Hi Ada (side), n=3"));
    }

    #[test]
    fn unresolved_placeholders_are_left_alone() {
        let out = interpolate(&json!({"a": "{{missing.x}}", "b": ["x {{nope}} y"]}), &input());
        assert_eq!(out, json!({"a": "{{missing.x}}", "b": ["x {{nope}} y"]}));
    }

    #[test]
    fn array_index_segments() {
        assert_eq!(lookup(&input(), "user.tags.1"), Some(&json!("b")));
        assert_eq!(lookup(&input(), "user.tags.9"), None);
    }
}
