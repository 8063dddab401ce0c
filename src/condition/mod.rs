//! Conditional expression trees and their boolean evaluation
//!
//! A [`ConditionalExpression`] is the JSON-serializable condition language
//! bound to field attributes by logic and validator configuration. Evaluation
//! never panics and never propagates an error: any internal failure (missing
//! function, parse error, malformed node) logs a diagnostic and yields
//! `false`, so a bad condition can hide a field but never crash a form.

use crate::expression::{
    ExpressionBindings, ExpressionCache, evaluate_expression, is_truthy,
};
use crate::model::{ComparisonOperator, compare_values, get_nested_value};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A named function callable from `custom` conditions and derivations
pub type CustomFunction = Arc<dyn Fn(&EvaluationContext<'_>) -> Value + Send + Sync>;

/// Name-keyed map of custom functions
pub type CustomFunctionMap = FxHashMap<String, CustomFunction>;

/// Context for a single condition/derivation evaluation
///
/// Constructed fresh per evaluation call and never persisted.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Current value of the field the condition is attached to
    pub field_value: &'a Value,
    /// The whole form value tree
    pub form_value: &'a Value,
    /// Dot path of the field the condition is attached to
    pub field_path: &'a str,
    /// Custom functions in scope for `custom` nodes
    pub custom_functions: &'a CustomFunctionMap,
    /// Parse-once cache for `javascript` nodes
    pub expressions: &'a ExpressionCache,
}

impl<'a> EvaluationContext<'a> {
    /// Expression bindings view of this context
    pub fn bindings(&self) -> ExpressionBindings<'a> {
        ExpressionBindings {
            field_value: self.field_value,
            form_value: self.form_value,
            field_path: self.field_path,
        }
    }
}

/// Condition tree driving field state, derivations and conditional validators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConditionalExpression {
    /// Compare one field's current value against a literal
    #[serde(rename = "fieldValue", rename_all = "camelCase")]
    FieldValue {
        /// Dot path of the field to read, resolved from the form root
        field_path: String,
        /// Comparison operator; a missing operator disables the condition
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator: Option<ComparisonOperator>,
        /// Literal to compare against
        #[serde(default)]
        value: Value,
    },

    /// Compare the entire form value against a literal
    #[serde(rename = "formValue", rename_all = "camelCase")]
    FormValue {
        /// Comparison operator; a missing operator disables the condition
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator: Option<ComparisonOperator>,
        /// Literal to compare against
        #[serde(default)]
        value: Value,
    },

    /// Invoke a named custom function with the evaluation context
    #[serde(rename = "custom")]
    Custom {
        /// Registered function name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },

    /// Evaluate a restricted expression string
    #[serde(rename = "javascript")]
    Javascript {
        /// Expression source with `fieldValue`/`formValue`/`fieldPath` in scope
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },

    /// Logical conjunction; `and([])` is `true`
    #[serde(rename = "and")]
    And {
        /// Recursively evaluated subconditions
        #[serde(default)]
        conditions: Vec<ConditionalExpression>,
    },

    /// Logical disjunction; `or([])` is `false`
    #[serde(rename = "or")]
    Or {
        /// Recursively evaluated subconditions
        #[serde(default)]
        conditions: Vec<ConditionalExpression>,
    },

    /// Unrecognized condition type; always evaluates to `false`
    #[serde(other, rename = "unknown")]
    Unknown,
}

/// Evaluate a condition tree to a boolean.
///
/// Fail-closed: malformed nodes, unknown types, unregistered functions and
/// unparsable expressions all log and yield `false`.
pub fn evaluate_condition(expr: &ConditionalExpression, ctx: &EvaluationContext<'_>) -> bool {
    match expr {
        ConditionalExpression::FieldValue {
            field_path,
            operator,
            value,
        } => {
            let Some(operator) = operator else {
                log::warn!("fieldValue condition on '{field_path}' has no operator");
                return false;
            };
            let actual = get_nested_value(ctx.form_value, field_path).unwrap_or(&Value::Null);
            compare_values(actual, value, *operator)
        }
        ConditionalExpression::FormValue { operator, value } => {
            let Some(operator) = operator else {
                log::warn!("formValue condition has no operator");
                return false;
            };
            compare_values(ctx.form_value, value, *operator)
        }
        ConditionalExpression::Custom { expression } => {
            let Some(name) = non_empty(expression) else {
                log::warn!("custom condition has no expression name");
                return false;
            };
            match ctx.custom_functions.get(name) {
                Some(function) => is_truthy(&function(ctx)),
                None => {
                    log::warn!("custom condition references unknown function '{name}'");
                    false
                }
            }
        }
        ConditionalExpression::Javascript { expression } => {
            let Some(source) = non_empty(expression) else {
                log::warn!("javascript condition has no expression");
                return false;
            };
            let compiled = match ctx.expressions.get_or_compile(source) {
                Ok(compiled) => compiled,
                Err(error) => {
                    log::warn!("failed to parse expression '{source}': {error}");
                    return false;
                }
            };
            match evaluate_expression(&compiled, &ctx.bindings()) {
                Ok(result) => is_truthy(&result),
                Err(error) => {
                    log::warn!("failed to evaluate expression '{source}': {error}");
                    false
                }
            }
        }
        ConditionalExpression::And { conditions } => conditions
            .iter()
            .all(|condition| evaluate_condition(condition, ctx)),
        ConditionalExpression::Or { conditions } => conditions
            .iter()
            .any(|condition| evaluate_condition(condition, ctx)),
        ConditionalExpression::Unknown => {
            log::warn!("unknown condition type, treating as false");
            false
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx_parts() -> (Value, CustomFunctionMap, ExpressionCache) {
        (
            json!({"contactMethod": "phone", "age": 17}),
            CustomFunctionMap::default(),
            ExpressionCache::new(),
        )
    }

    fn eval_with(
        expr: &ConditionalExpression,
        form: &Value,
        functions: &CustomFunctionMap,
        cache: &ExpressionCache,
    ) -> bool {
        let field_value = get_nested_value(form, "contactMethod")
            .cloned()
            .unwrap_or(Value::Null);
        evaluate_condition(
            expr,
            &EvaluationContext {
                field_value: &field_value,
                form_value: form,
                field_path: "contactMethod",
                custom_functions: functions,
                expressions: cache,
            },
        )
    }

    #[test]
    fn field_value_comparison_resolves_dot_paths() {
        let (form, functions, cache) = ctx_parts();
        let expr: ConditionalExpression = serde_json::from_value(json!({
            "type": "fieldValue",
            "fieldPath": "contactMethod",
            "operator": "notEquals",
            "value": "email"
        }))
        .unwrap();
        assert!(eval_with(&expr, &form, &functions, &cache));
    }

    #[test]
    fn missing_operator_fails_closed() {
        let (form, functions, cache) = ctx_parts();
        let expr: ConditionalExpression = serde_json::from_value(json!({
            "type": "fieldValue",
            "fieldPath": "age",
            "value": 18
        }))
        .unwrap();
        assert!(!eval_with(&expr, &form, &functions, &cache));
    }

    #[test]
    fn unknown_type_fails_closed() {
        let (form, functions, cache) = ctx_parts();
        let expr: ConditionalExpression =
            serde_json::from_value(json!({"type": "telepathy", "anything": 1})).unwrap();
        assert_eq!(expr, ConditionalExpression::Unknown);
        assert!(!eval_with(&expr, &form, &functions, &cache));
    }

    #[test]
    fn and_or_composition_matches_boolean_algebra() {
        let (form, functions, cache) = ctx_parts();
        let p = ConditionalExpression::Javascript {
            expression: Some("formValue.age < 18".into()),
        };
        let q = ConditionalExpression::Javascript {
            expression: Some("formValue.contactMethod == 'phone'".into()),
        };
        for (conditions, and_expected, or_expected) in [
            (vec![p.clone(), q.clone()], true, true),
            (vec![p.clone()], true, true),
            (vec![], true, false),
        ] {
            let and = ConditionalExpression::And {
                conditions: conditions.clone(),
            };
            let or = ConditionalExpression::Or { conditions };
            assert_eq!(eval_with(&and, &form, &functions, &cache), and_expected);
            assert_eq!(eval_with(&or, &form, &functions, &cache), or_expected);
        }
    }

    #[test]
    fn custom_functions_receive_the_context() {
        let (form, mut functions, cache) = ctx_parts();
        functions.insert(
            "isAdult".to_string(),
            Arc::new(|ctx: &EvaluationContext<'_>| {
                json!(
                    get_nested_value(ctx.form_value, "age")
                        .and_then(Value::as_i64)
                        .is_some_and(|age| age >= 18)
                )
            }),
        );
        let expr = ConditionalExpression::Custom {
            expression: Some("isAdult".into()),
        };
        assert!(!eval_with(&expr, &form, &functions, &cache));
        let adult_form = json!({"contactMethod": "phone", "age": 21});
        assert!(eval_with(&expr, &adult_form, &functions, &cache));
    }

    #[test]
    fn unregistered_function_fails_closed() {
        let (form, functions, cache) = ctx_parts();
        let expr = ConditionalExpression::Custom {
            expression: Some("nope".into()),
        };
        assert!(!eval_with(&expr, &form, &functions, &cache));
    }

    #[test]
    fn unparsable_javascript_fails_closed() {
        let (form, functions, cache) = ctx_parts();
        let expr = ConditionalExpression::Javascript {
            expression: Some("fieldValue >".into()),
        };
        assert!(!eval_with(&expr, &form, &functions, &cache));
    }

    #[test]
    fn round_trips_through_serde() {
        let expr = ConditionalExpression::And {
            conditions: vec![
                ConditionalExpression::FieldValue {
                    field_path: "a".into(),
                    operator: Some(ComparisonOperator::Equals),
                    value: json!(1),
                },
                ConditionalExpression::Or { conditions: vec![] },
            ],
        };
        let encoded = serde_json::to_value(&expr).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "and",
                "conditions": [
                    {"type": "fieldValue", "fieldPath": "a", "operator": "equals", "value": 1},
                    {"type": "or", "conditions": []}
                ]
            })
        );
        let decoded: ConditionalExpression = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, expr);
    }
}
