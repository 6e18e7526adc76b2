use serde_json::Value;

use super::model::{CanonicalText, RuleBody};

/// Flatten a rule body into its canonical text.
///
/// A body supplied as a string is first parsed as JSON; if the parse
/// fails the raw string is returned unchanged. The recursion joins
/// `key:value` pairs and sequence elements with single spaces, keeping
/// the input's own key order. This function never fails.
pub fn flatten(body: &RuleBody) -> CanonicalText {
    match body.value() {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => rec(&parsed).into(),
            Err(_) => s.as_str().into(),
        },
        other => rec(other).into(),
    }
}

fn rec(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}:{}", k, rec(v)))
            .collect::<Vec<String>>()
            .join(" "),
        Value::Array(items) => items.iter().map(rec).collect::<Vec<String>>().join(" "),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}
