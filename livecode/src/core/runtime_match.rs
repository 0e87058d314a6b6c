//! Dynamic rule matching against runtime-reported values.
//!
//! The isolated host reports `(needle, value)` pairs while a run executes.
//! Each report is applied independently and idempotently to every rule
//! sharing that needle; reapplying the same pair is a no-op change.

use serde_json::Value;

use crate::core::rules::{RuleKind, RuleSet};

/// Apply one runtime report to the rule set and return the updated set.
///
/// Expected type and value drive the check: with both declared, the value
/// must match the declared `typeof` *and* be loosely equal; with only a
/// type, the `typeof` alone decides; with neither, a JS_VAR_EQUALS rule
/// passes as long as the variable came back defined.
pub fn apply_runtime_value(set: &RuleSet, needle: &str, value: &Value) -> RuleSet {
    let rules = set
        .rules
        .iter()
        .map(|rule| {
            let mut updated = rule.clone();
            if rule.needle != needle {
                return updated;
            }
            let expected_type = match rule.kind {
                RuleKind::JsVarEquals | RuleKind::JsFuncEquals => rule.value_type.as_deref(),
                _ => None,
            };
            match (expected_type, rule.value.as_ref()) {
                (Some(t), Some(expected)) => {
                    updated.passing = Some(js_typeof(value) == t && loosely_equals(value, expected));
                }
                (Some(t), None) => {
                    updated.passing = Some(js_typeof(value) == t);
                }
                (None, None) if rule.kind == RuleKind::JsVarEquals => {
                    updated.passing = Some(js_typeof(value) != "undefined");
                }
                _ => {}
            }
            updated
        })
        .collect();
    RuleSet::new(rules)
}

/// JS `typeof` for a wire value.
///
/// The wire is JSON, which has no `undefined`; the host reports an
/// undefined variable as `null`, so `Null` maps to `"undefined"` here.
pub fn js_typeof(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

/// JS `==` over wire values: number/string/boolean coerce through
/// `ToNumber`, same-type primitives compare directly. Objects and arrays
/// compare by reference in JS, which can never hold across the wire, so
/// they never loosely equal anything here.
fn loosely_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse().ok()
            }
        }
        _ => None,
    }
}
