//! Value utilities for form logic evaluation
//!
//! Dot-path traversal over a JSON form-value tree and the comparison
//! operators used by conditional expressions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators available to `fieldValue`/`formValue` conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOperator {
    /// Strict equality (value equality for scalars, never true for containers)
    Equals,
    /// Strict inequality
    NotEquals,
    /// Numeric greater-than
    Greater,
    /// Numeric less-than
    Less,
    /// Numeric greater-than-or-equal
    GreaterOrEqual,
    /// Numeric less-than-or-equal
    LessOrEqual,
    /// Substring containment after string coercion
    Contains,
    /// String prefix test after string coercion
    StartsWith,
    /// String suffix test after string coercion
    EndsWith,
    /// Regular-expression test; the expected value is the pattern
    Matches,
}

/// Resolve a dot-separated path against a JSON tree.
///
/// Numeric segments index into arrays (`items.0.name`). Traversal
/// short-circuits to `None` as soon as an intermediate value is not a
/// container or the key/index is absent.
pub fn get_nested_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write a value at a dot-separated path, creating intermediate objects.
///
/// Returns `false` without modifying the tree when the path runs through an
/// existing non-container value or an out-of-bounds array index.
pub fn set_nested_value(root: &mut Value, path: &str, value: Value) -> bool {
    if path.is_empty() {
        *root = value;
        return true;
    }
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        match current {
            Value::Object(map) => {
                if last {
                    map.insert((*segment).to_string(), value);
                    return true;
                }
                current = map
                    .entry((*segment).to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
            }
            Value::Array(items) => {
                let Ok(index) = segment.parse::<usize>() else {
                    return false;
                };
                let Some(slot) = items.get_mut(index) else {
                    return false;
                };
                if last {
                    *slot = value;
                    return true;
                }
                current = slot;
            }
            _ => return false,
        }
    }
    false
}

/// Compare a resolved value against a configured literal.
///
/// Missing values are passed in as `Value::Null`. Equality is strict:
/// scalars compare by value (numbers numerically), while objects and arrays
/// are treated as distinct instances and never compare equal. Ordering
/// operators coerce both sides to `f64`; anything non-numeric becomes NaN
/// and every comparison against NaN is `false`. String operators coerce both
/// sides to strings. `Matches` compiles the expected value as a regex; a
/// pattern that fails to compile yields `false`.
pub fn compare_values(actual: &Value, expected: &Value, operator: ComparisonOperator) -> bool {
    match operator {
        ComparisonOperator::Equals => strict_value_equals(actual, expected),
        ComparisonOperator::NotEquals => !strict_value_equals(actual, expected),
        ComparisonOperator::Greater => to_number(actual) > to_number(expected),
        ComparisonOperator::Less => to_number(actual) < to_number(expected),
        ComparisonOperator::GreaterOrEqual => to_number(actual) >= to_number(expected),
        ComparisonOperator::LessOrEqual => to_number(actual) <= to_number(expected),
        ComparisonOperator::Contains => to_display_string(actual).contains(&to_display_string(expected)),
        ComparisonOperator::StartsWith => {
            to_display_string(actual).starts_with(&to_display_string(expected))
        }
        ComparisonOperator::EndsWith => {
            to_display_string(actual).ends_with(&to_display_string(expected))
        }
        ComparisonOperator::Matches => match regex::Regex::new(&to_display_string(expected)) {
            Ok(re) => re.is_match(&to_display_string(actual)),
            Err(error) => {
                log::warn!("invalid regex in matches comparison: {error}");
                false
            }
        },
    }
}

/// Strict equality: scalars by value (numbers numerically), containers never
/// equal (distinct-instance semantics).
pub fn strict_value_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        // Numbers compare numerically so 5 and 5.0 are the same value
        (Value::Number(_), Value::Number(_)) => to_number(left) == to_number(right),
        // Containers are distinct instances, never equal
        _ => false,
    }
}

/// Numeric coercion: numbers pass through, numeric strings parse, booleans
/// map to 0/1, everything else is NaN.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Bool(true) => 1.0,
        Value::Bool(false) => 0.0,
        _ => f64::NAN,
    }
}

/// String coercion used by the substring/prefix/suffix/regex operators.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(to_display_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Render a float without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Emptiness test used by the `required` validator: null, empty string and
/// empty array count as empty; `0` and `false` do not.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Build an f64 JSON number, collapsing NaN/infinity to null.
pub fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn nested_lookup_resolves_deep_paths() {
        let root = json!({"user": {"role": "admin", "tags": ["a", "b"]}});
        assert_eq!(
            get_nested_value(&root, "user.role"),
            Some(&json!("admin"))
        );
        assert_eq!(get_nested_value(&root, "user.tags.1"), Some(&json!("b")));
    }

    #[test]
    fn nested_lookup_short_circuits_on_missing_segments() {
        assert_eq!(get_nested_value(&json!({}), "a.b.c"), None);
        assert_eq!(get_nested_value(&json!({"a": 1}), "a.b"), None);
    }

    #[test]
    fn set_nested_creates_intermediate_objects() {
        let mut root = json!({});
        assert!(set_nested_value(&mut root, "user.name", json!("Ada")));
        assert_eq!(root, json!({"user": {"name": "Ada"}}));
    }

    #[test]
    fn set_nested_refuses_to_overwrite_scalars_mid_path() {
        let mut root = json!({"a": 1});
        assert!(!set_nested_value(&mut root, "a.b", json!(2)));
        assert_eq!(root, json!({"a": 1}));
    }

    #[test]
    fn equals_is_strict() {
        assert!(compare_values(&json!(5), &json!(5), ComparisonOperator::Equals));
        assert!(compare_values(&json!(5), &json!(5.0), ComparisonOperator::Equals));
        assert!(!compare_values(&json!({}), &json!({}), ComparisonOperator::Equals));
        assert!(!compare_values(&json!([1]), &json!([1]), ComparisonOperator::Equals));
        assert!(!compare_values(&json!("5"), &json!(5), ComparisonOperator::Equals));
    }

    #[rstest]
    #[case(json!(10), json!("5"), ComparisonOperator::Greater, true)]
    #[case(json!("abc"), json!(5), ComparisonOperator::Greater, false)]
    #[case(json!("abc"), json!(5), ComparisonOperator::LessOrEqual, false)]
    #[case(json!("3"), json!(3), ComparisonOperator::GreaterOrEqual, true)]
    #[case(json!(null), json!(0), ComparisonOperator::Less, false)]
    #[case(json!(true), json!(0), ComparisonOperator::Greater, true)]
    fn ordering_coerces_to_numbers(
        #[case] actual: serde_json::Value,
        #[case] expected: serde_json::Value,
        #[case] operator: ComparisonOperator,
        #[case] outcome: bool,
    ) {
        assert_eq!(compare_values(&actual, &expected, operator), outcome);
    }

    #[test]
    fn string_operators_coerce_both_sides() {
        assert!(compare_values(&json!("hello world"), &json!("world"), ComparisonOperator::Contains));
        assert!(compare_values(&json!(123), &json!("12"), ComparisonOperator::StartsWith));
        assert!(compare_values(&json!("report.pdf"), &json!(".pdf"), ComparisonOperator::EndsWith));
    }

    #[test]
    fn matches_compiles_expected_as_regex() {
        assert!(compare_values(&json!("a42"), &json!("^a\\d+$"), ComparisonOperator::Matches));
        assert!(!compare_values(&json!("a42"), &json!("^b"), ComparisonOperator::Matches));
        // Invalid pattern must not panic
        assert!(!compare_values(&json!("x"), &json!("("), ComparisonOperator::Matches));
    }

    #[test]
    fn emptiness_for_required() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
    }
}
