//! Sandboxed expression evaluation
//!
//! Interprets a parsed [`ExpressionNode`] against exactly three read-only
//! bindings: `fieldValue`, `formValue` and `fieldPath`. Nothing else is
//! reachable from an expression string, which is the security boundary for
//! configuration that may be externally supplied.

mod cache;

pub use cache::ExpressionCache;

use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, UnaryOperator};
use crate::model::{number_value, strict_value_equals, to_display_string, to_number};
use serde_json::Value;
use thiserror::Error;

/// Result type for expression evaluation
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Expression evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Identifier outside the three exposed bindings
    #[error("Unknown identifier '{name}': only fieldValue, formValue and fieldPath are in scope")]
    UnknownIdentifier {
        /// The identifier that was referenced
        name: String,
    },

    /// Method not in the supported set
    #[error("Unknown method '{method}'")]
    UnknownMethod {
        /// The method that was called
        method: String,
    },

    /// Wrong number of arguments to a method
    #[error("Method '{method}' expects {expected} argument(s), got {actual}")]
    InvalidArgumentCount {
        /// The method that was called
        method: String,
        /// Number of arguments it takes
        expected: usize,
        /// Number of arguments provided
        actual: usize,
    },
}

/// The read-only bindings exposed to an expression
#[derive(Debug, Clone, Copy)]
pub struct ExpressionBindings<'a> {
    /// Current value of the field the expression is attached to
    pub field_value: &'a Value,
    /// The whole form value tree
    pub form_value: &'a Value,
    /// Dot path of the field the expression is attached to
    pub field_path: &'a str,
}

/// Evaluate an expression against the given bindings.
///
/// Missing properties resolve to null rather than failing, mirroring the
/// dot-path utilities. Arithmetic producing a non-finite number collapses to
/// null, which every ordering comparison then treats as NaN.
pub fn evaluate_expression(
    expr: &ExpressionNode,
    bindings: &ExpressionBindings<'_>,
) -> ExpressionResult<Value> {
    match expr {
        ExpressionNode::Literal(literal) => Ok(literal_value(literal)),
        ExpressionNode::Identifier(name) => match name.as_str() {
            "fieldValue" => Ok(bindings.field_value.clone()),
            "formValue" => Ok(bindings.form_value.clone()),
            "fieldPath" => Ok(Value::String(bindings.field_path.to_string())),
            _ => Err(ExpressionError::UnknownIdentifier { name: name.clone() }),
        },
        ExpressionNode::Member { base, property } => {
            let base = evaluate_expression(base, bindings)?;
            Ok(member_access(&base, property))
        }
        ExpressionNode::Index { base, index } => {
            let base = evaluate_expression(base, bindings)?;
            let index = evaluate_expression(index, bindings)?;
            Ok(index_access(&base, &index))
        }
        ExpressionNode::MethodCall { base, method, args } => {
            let base = evaluate_expression(base, bindings)?;
            let args = args
                .iter()
                .map(|arg| evaluate_expression(arg, bindings))
                .collect::<ExpressionResult<Vec<Value>>>()?;
            call_method(&base, method, &args)
        }
        ExpressionNode::BinaryOp { op, left, right } => match op {
            // && and || return an operand, not a coerced boolean, so they
            // work as fallback selectors in derivations
            BinaryOperator::And => {
                let left = evaluate_expression(left, bindings)?;
                if is_truthy(&left) {
                    evaluate_expression(right, bindings)
                } else {
                    Ok(left)
                }
            }
            BinaryOperator::Or => {
                let left = evaluate_expression(left, bindings)?;
                if is_truthy(&left) {
                    Ok(left)
                } else {
                    evaluate_expression(right, bindings)
                }
            }
            _ => {
                let left = evaluate_expression(left, bindings)?;
                let right = evaluate_expression(right, bindings)?;
                Ok(binary_op(*op, &left, &right))
            }
        },
        ExpressionNode::UnaryOp { op, operand } => {
            let operand = evaluate_expression(operand, bindings)?;
            Ok(match op {
                UnaryOperator::Minus => number_value(-to_number(&operand)),
                UnaryOperator::Not => Value::Bool(!is_truthy(&operand)),
                UnaryOperator::TypeOf => Value::String(type_name(&operand).to_string()),
            })
        }
        ExpressionNode::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            let condition = evaluate_expression(condition, bindings)?;
            if is_truthy(&condition) {
                evaluate_expression(then_expr, bindings)
            } else {
                evaluate_expression(else_expr, bindings)
            }
        }
    }
}

/// JavaScript-style truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn literal_value(literal: &LiteralValue) -> Value {
    match literal {
        LiteralValue::Boolean(b) => Value::Bool(*b),
        LiteralValue::Number(n) => number_value(*n),
        LiteralValue::String(s) => Value::String(s.clone()),
        LiteralValue::Null => Value::Null,
    }
}

fn member_access(base: &Value, property: &str) -> Value {
    if property == "length" {
        return match base {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            _ => Value::Null,
        };
    }
    match base {
        Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index_access(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), Value::String(key)) => {
            map.get(key).cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn call_method(base: &Value, method: &str, args: &[Value]) -> ExpressionResult<Value> {
    let single_arg = |args: &[Value]| -> ExpressionResult<Value> {
        match args {
            [arg] => Ok(arg.clone()),
            _ => Err(ExpressionError::InvalidArgumentCount {
                method: method.to_string(),
                expected: 1,
                actual: args.len(),
            }),
        }
    };

    match method {
        "includes" => {
            let needle = single_arg(args)?;
            Ok(Value::Bool(match base {
                Value::Array(items) => items.iter().any(|item| strict_value_equals(item, &needle)),
                other => to_display_string(other).contains(&to_display_string(&needle)),
            }))
        }
        "startsWith" => {
            let prefix = single_arg(args)?;
            Ok(Value::Bool(
                to_display_string(base).starts_with(&to_display_string(&prefix)),
            ))
        }
        "endsWith" => {
            let suffix = single_arg(args)?;
            Ok(Value::Bool(
                to_display_string(base).ends_with(&to_display_string(&suffix)),
            ))
        }
        "toLowerCase" => Ok(Value::String(to_display_string(base).to_lowercase())),
        "toUpperCase" => Ok(Value::String(to_display_string(base).to_uppercase())),
        "trim" => Ok(Value::String(to_display_string(base).trim().to_string())),
        _ => Err(ExpressionError::UnknownMethod {
            method: method.to_string(),
        }),
    }
}

fn binary_op(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOperator::Add => {
            if left.is_string() || right.is_string() {
                Value::String(format!(
                    "{}{}",
                    to_display_string(left),
                    to_display_string(right)
                ))
            } else {
                number_value(to_number(left) + to_number(right))
            }
        }
        BinaryOperator::Subtract => number_value(to_number(left) - to_number(right)),
        BinaryOperator::Multiply => number_value(to_number(left) * to_number(right)),
        BinaryOperator::Divide => number_value(to_number(left) / to_number(right)),
        BinaryOperator::Modulo => number_value(to_number(left) % to_number(right)),
        BinaryOperator::Equal => Value::Bool(strict_value_equals(left, right)),
        BinaryOperator::NotEqual => Value::Bool(!strict_value_equals(left, right)),
        BinaryOperator::Less => Value::Bool(to_number(left) < to_number(right)),
        BinaryOperator::LessOrEqual => Value::Bool(to_number(left) <= to_number(right)),
        BinaryOperator::Greater => Value::Bool(to_number(left) > to_number(right)),
        BinaryOperator::GreaterOrEqual => Value::Bool(to_number(left) >= to_number(right)),
        // Short-circuiting operators are handled by the caller
        BinaryOperator::And | BinaryOperator::Or => Value::Null,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}
