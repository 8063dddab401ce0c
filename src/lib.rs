//! Declarative form logic and validation engine
//!
//! Renders user-defined form behavior from JSON-serializable configuration:
//! a condition language bound to field attributes (hidden, readonly,
//! disabled, required), a derivation pipeline for computed values with
//! immediate and debounced triggers, and an extensible validator pipeline
//! (built-in, conditional, custom, async, remote). Expressions evaluate in a
//! restricted interpreter that can only see `fieldValue`, `formValue` and
//! `fieldPath`: configuration is data, never code.

pub mod ast;
pub mod condition;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod expression;
pub mod form;
pub mod logic;
pub mod model;
pub mod parser;
pub mod registry;
pub mod validate;

// Re-export main types
pub use condition::{ConditionalExpression, EvaluationContext, evaluate_condition};
pub use config::{
    FieldConfig, FieldType, FormConfig, FormStateCondition, LogicCondition, LogicConfig,
    SchemaApplicationConfig, SchemaRef, Trigger, ValidatorConfig,
};
pub use diagnostics::{ConfigDiagnostic, DiagnosticCode, Severity};
pub use engine::FormEngine;
pub use expression::{ExpressionCache, evaluate_expression};
pub use form::{FieldNode, FieldState};
pub use model::{ComparisonOperator, compare_values, get_nested_value, set_nested_value};
pub use parser::{ParseError, parse_expression};
pub use registry::{FunctionRegistry, SchemaRegistry};
pub use validate::{
    AsyncValidationError, RemoteTransport, RemoteValidation, ValidationContext, ValidationError,
    ValidationRequest, ValidatorError,
};
