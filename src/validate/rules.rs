//! Validator compilation
//!
//! Turns `ValidatorConfig` entries into compiled rules. Built-in validators
//! with no configured constraint compile to nothing at all: absence is "not
//! configured", not an error. A static pattern that fails to compile is a
//! configuration bug and propagates.

use super::{ValidationContext, ValidationError, interpolate_message};
use crate::condition::{ConditionalExpression, EvaluationContext, evaluate_condition};
use crate::config::{BuiltinValidatorConfig, CustomValidatorConfig, ValidatorConfig};
use crate::expression::{evaluate_expression, is_truthy};
use crate::model::{is_empty_value, to_display_string, to_number};
use crate::registry::{CustomValidator, FunctionRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex compiles"));

/// Hard configuration errors raised while compiling validators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidatorError {
    /// Pattern that does not compile as a regular expression
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern source
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// Pattern constraint that is not a string
    #[error("Pattern constraint must be a string, got {found}")]
    NonStringPattern {
        /// JSON type of the configured value
        found: String,
    },
}

/// Everything a rule may read while evaluating
#[derive(Clone, Copy)]
pub struct RuleScope<'a> {
    /// Evaluation context of the field under validation
    pub ctx: EvaluationContext<'a>,
    /// Registry for resolving named validators
    pub registry: &'a FunctionRegistry,
}

impl<'a> RuleScope<'a> {
    fn validation_context(&self, params: Option<&'a Value>) -> ValidationContext<'a> {
        ValidationContext {
            value: self.ctx.field_value,
            form_value: self.ctx.form_value,
            field_path: self.ctx.field_path,
            params,
        }
    }
}

/// Synchronous rule body
pub type SyncRule = Arc<dyn Fn(&RuleScope<'_>) -> Option<ValidationError> + Send + Sync>;

/// How a compiled rule executes
#[derive(Clone)]
pub enum RuleKind {
    /// Evaluates inside the reactive flush
    Sync(SyncRule),
    /// Runs a registered async validator on the runtime
    Async {
        /// Registered validator name
        function_name: String,
        /// Parameters forwarded in the validation request
        params: Option<Value>,
    },
    /// Resolves a remote descriptor and hands it to the transport
    Http {
        /// Registered resolver name
        function_name: String,
        /// Parameters forwarded to the resolver
        params: Option<Value>,
    },
}

/// A validator compiled for one field
#[derive(Clone)]
pub struct CompiledValidator {
    /// Error-map key this rule reports under
    pub kind: String,
    /// Activation condition; inactive rules contribute nothing
    pub when: Option<ConditionalExpression>,
    /// Rule body
    pub rule: RuleKind,
}

impl CompiledValidator {
    /// Whether the rule is currently active
    pub fn is_active(&self, scope: &RuleScope<'_>) -> bool {
        match &self.when {
            Some(condition) => evaluate_condition(condition, &scope.ctx),
            None => true,
        }
    }
}

/// Compile one validator entry.
///
/// Returns `Ok(None)` when the entry is not configured enough to attach
/// (built-in constraint validators without `value` or `expression`, unknown
/// types, custom entries with nothing to call).
pub fn compile_validator(
    config: &ValidatorConfig,
    messages: &BTreeMap<String, String>,
) -> Result<Option<CompiledValidator>, ValidatorError> {
    match config {
        ValidatorConfig::Required(builtin) => Ok(Some(compile_required(builtin, messages))),
        ValidatorConfig::Email(builtin) => Ok(Some(compile_email(builtin, messages))),
        ValidatorConfig::Min(builtin) => Ok(compile_numeric_bound(builtin, messages, "min")),
        ValidatorConfig::Max(builtin) => Ok(compile_numeric_bound(builtin, messages, "max")),
        ValidatorConfig::MinLength(builtin) => Ok(compile_length_bound(builtin, messages, "minLength")),
        ValidatorConfig::MaxLength(builtin) => Ok(compile_length_bound(builtin, messages, "maxLength")),
        ValidatorConfig::Pattern(builtin) => compile_pattern(builtin, messages),
        ValidatorConfig::Custom(custom) => Ok(compile_custom(custom, messages)),
        ValidatorConfig::CustomAsync(custom) => Ok(compile_async(custom, "customAsync")),
        ValidatorConfig::CustomHttp(custom) => Ok(compile_async_http(custom)),
        ValidatorConfig::Unknown => {
            log::warn!("unknown validator type, skipping");
            Ok(None)
        }
    }
}

fn template_for(
    kind: &str,
    config_message: Option<&String>,
    messages: &BTreeMap<String, String>,
) -> String {
    if let Some(message) = config_message {
        return message.clone();
    }
    if let Some(message) = messages.get(kind) {
        return message.clone();
    }
    default_template(kind).to_string()
}

fn default_template(kind: &str) -> &'static str {
    match kind {
        "required" => "This field is required",
        "email" => "Must be a valid email address",
        "min" => "Must be at least {min}",
        "max" => "Must be at most {max}",
        "minLength" => "Must be at least {minLength} characters long",
        "maxLength" => "Must be at most {maxLength} characters long",
        "pattern" => "Must match the required pattern",
        super::ASYNC_FAILED_KIND => "Validation could not be completed",
        _ => "Invalid value",
    }
}

fn render(kind: &str, template: &str, params: Option<Value>) -> ValidationError {
    let message = interpolate_message(template, params.as_ref());
    ValidationError {
        kind: kind.to_string(),
        message,
        params,
    }
}

/// A constraint that is either static or recomputed from an expression.
/// When both are configured, the expression wins.
enum Constraint {
    Static(Value),
    Expression(String),
}

impl Constraint {
    fn from_config(config: &BuiltinValidatorConfig) -> Option<Self> {
        if let Some(expression) = config
            .expression
            .as_ref()
            .filter(|e| !e.trim().is_empty())
        {
            return Some(Constraint::Expression(expression.clone()));
        }
        config.value.clone().map(Constraint::Static)
    }

    fn resolve(&self, scope: &RuleScope<'_>) -> Option<Value> {
        match self {
            Constraint::Static(value) => Some(value.clone()),
            Constraint::Expression(source) => {
                let compiled = match scope.ctx.expressions.get_or_compile(source) {
                    Ok(compiled) => compiled,
                    Err(error) => {
                        log::warn!("failed to parse constraint expression '{source}': {error}");
                        return None;
                    }
                };
                match evaluate_expression(&compiled, &scope.ctx.bindings()) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        log::warn!("failed to evaluate constraint expression '{source}': {error}");
                        None
                    }
                }
            }
        }
    }
}

fn compile_required(
    config: &BuiltinValidatorConfig,
    messages: &BTreeMap<String, String>,
) -> CompiledValidator {
    let template = template_for("required", config.message.as_ref(), messages);
    CompiledValidator {
        kind: "required".to_string(),
        when: config.when.clone(),
        rule: RuleKind::Sync(Arc::new(move |scope| {
            if is_empty_value(scope.ctx.field_value) {
                Some(render("required", &template, None))
            } else {
                None
            }
        })),
    }
}

fn compile_email(
    config: &BuiltinValidatorConfig,
    messages: &BTreeMap<String, String>,
) -> CompiledValidator {
    let template = template_for("email", config.message.as_ref(), messages);
    CompiledValidator {
        kind: "email".to_string(),
        when: config.when.clone(),
        rule: RuleKind::Sync(Arc::new(move |scope| {
            let value = scope.ctx.field_value;
            if is_empty_value(value) {
                return None;
            }
            if EMAIL_RE.is_match(&to_display_string(value)) {
                None
            } else {
                Some(render("email", &template, None))
            }
        })),
    }
}

fn compile_numeric_bound(
    config: &BuiltinValidatorConfig,
    messages: &BTreeMap<String, String>,
    kind: &'static str,
) -> Option<CompiledValidator> {
    let constraint = Constraint::from_config(config)?;
    let template = template_for(kind, config.message.as_ref(), messages);
    Some(CompiledValidator {
        kind: kind.to_string(),
        when: config.when.clone(),
        rule: RuleKind::Sync(Arc::new(move |scope| {
            let bound = to_number(&constraint.resolve(scope)?);
            if bound.is_nan() {
                log::warn!("{kind} constraint is not numeric, skipping");
                return None;
            }
            let value = scope.ctx.field_value;
            if is_empty_value(value) {
                return None;
            }
            let actual = to_number(value);
            if actual.is_nan() {
                return None;
            }
            let violated = match kind {
                "min" => actual < bound,
                _ => actual > bound,
            };
            if violated {
                let params = json!({ kind: bound, "actual": actual });
                Some(render(kind, &template, Some(params)))
            } else {
                None
            }
        })),
    })
}

fn compile_length_bound(
    config: &BuiltinValidatorConfig,
    messages: &BTreeMap<String, String>,
    kind: &'static str,
) -> Option<CompiledValidator> {
    let constraint = Constraint::from_config(config)?;
    let template = template_for(kind, config.message.as_ref(), messages);
    Some(CompiledValidator {
        kind: kind.to_string(),
        when: config.when.clone(),
        rule: RuleKind::Sync(Arc::new(move |scope| {
            let bound = to_number(&constraint.resolve(scope)?);
            if bound.is_nan() {
                log::warn!("{kind} constraint is not numeric, skipping");
                return None;
            }
            let value = scope.ctx.field_value;
            if is_empty_value(value) {
                return None;
            }
            let length = match value {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                _ => return None,
            };
            let bound = bound as usize;
            let violated = match kind {
                "minLength" => length < bound,
                _ => length > bound,
            };
            if violated {
                let params = json!({ kind: bound, "actualLength": length });
                Some(render(kind, &template, Some(params)))
            } else {
                None
            }
        })),
    })
}

fn compile_pattern(
    config: &BuiltinValidatorConfig,
    messages: &BTreeMap<String, String>,
) -> Result<Option<CompiledValidator>, ValidatorError> {
    enum PatternSource {
        Compiled(Arc<Regex>),
        Expression(String),
    }

    let source = if let Some(expression) = config
        .expression
        .as_ref()
        .filter(|e| !e.trim().is_empty())
    {
        PatternSource::Expression(expression.clone())
    } else {
        match &config.value {
            None => return Ok(None),
            // A static pattern that fails to compile is a configuration bug,
            // not a runtime condition
            Some(Value::String(pattern)) => match Regex::new(pattern) {
                Ok(regex) => PatternSource::Compiled(Arc::new(regex)),
                Err(error) => {
                    return Err(ValidatorError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: error.to_string(),
                    });
                }
            },
            Some(other) => {
                return Err(ValidatorError::NonStringPattern {
                    found: json_type_name(other).to_string(),
                });
            }
        }
    };

    let template = template_for("pattern", config.message.as_ref(), messages);
    Ok(Some(CompiledValidator {
        kind: "pattern".to_string(),
        when: config.when.clone(),
        rule: RuleKind::Sync(Arc::new(move |scope| {
            let value = scope.ctx.field_value;
            if is_empty_value(value) {
                return None;
            }
            let (regex, pattern_text) = match &source {
                PatternSource::Compiled(regex) => (regex.clone(), regex.as_str().to_string()),
                PatternSource::Expression(expr) => {
                    let constraint = Constraint::Expression(expr.clone()).resolve(scope)?;
                    let pattern = to_display_string(&constraint);
                    match Regex::new(&pattern) {
                        Ok(regex) => (Arc::new(regex), pattern),
                        Err(error) => {
                            log::error!("pattern expression produced invalid regex '{pattern}': {error}");
                            return None;
                        }
                    }
                }
            };
            if regex.is_match(&to_display_string(value)) {
                None
            } else {
                let params = json!({ "pattern": pattern_text });
                Some(render("pattern", &template, Some(params)))
            }
        })),
    }))
}

fn compile_custom(
    config: &CustomValidatorConfig,
    messages: &BTreeMap<String, String>,
) -> Option<CompiledValidator> {
    let kind = config.kind.clone().unwrap_or_else(|| "custom".to_string());
    let message_override = messages.get(&kind).cloned();
    let error_params = config.error_params.clone().or_else(|| config.params.clone());

    if let Some(function_name) = config
        .function_name
        .as_ref()
        .filter(|n| !n.trim().is_empty())
    {
        let function_name = function_name.clone();
        let params = config.params.clone();
        let kind_for_rule = kind.clone();
        return Some(CompiledValidator {
            kind,
            when: config.when.clone(),
            rule: RuleKind::Sync(Arc::new(move |scope| {
                let Some(validator) = scope.registry.resolve_custom_validator(&function_name)
                else {
                    log::warn!("custom validator '{function_name}' is not registered");
                    return None;
                };
                let context = scope.validation_context(params.as_ref());
                let produced = match validator {
                    CustomValidator::Simple(f) => f(context.value, context.params),
                    CustomValidator::Context(f) | CustomValidator::Tree(f) => f(&context),
                };
                produced.map(|mut error| {
                    error.kind = kind_for_rule.clone();
                    if let Some(template) = &message_override {
                        let params = error.params.clone().or_else(|| error_params.clone());
                        error.message = interpolate_message(template, params.as_ref());
                    }
                    error
                })
            })),
        });
    }

    if let Some(expression) = config.expression.as_ref().filter(|e| !e.trim().is_empty()) {
        let source = expression.clone();
        let template = message_override.unwrap_or_else(|| default_template(&kind).to_string());
        let kind_for_rule = kind.clone();
        return Some(CompiledValidator {
            kind,
            when: config.when.clone(),
            rule: RuleKind::Sync(Arc::new(move |scope| {
                let compiled = match scope.ctx.expressions.get_or_compile(&source) {
                    Ok(compiled) => compiled,
                    Err(error) => {
                        log::warn!("failed to parse validator expression '{source}': {error}");
                        return None;
                    }
                };
                match evaluate_expression(&compiled, &scope.ctx.bindings()) {
                    Ok(result) if is_truthy(&result) => None,
                    Ok(_) => Some(render(&kind_for_rule, &template, error_params.clone())),
                    Err(error) => {
                        log::warn!("failed to evaluate validator expression '{source}': {error}");
                        None
                    }
                }
            })),
        });
    }

    // Enforced at schema-validation time; direct construction degrades to a no-op
    log::warn!("custom validator has neither functionName nor expression, skipping");
    None
}

fn compile_async(config: &CustomValidatorConfig, default_kind: &str) -> Option<CompiledValidator> {
    let Some(function_name) = config
        .function_name
        .as_ref()
        .filter(|n| !n.trim().is_empty())
    else {
        log::warn!("{default_kind} validator requires functionName, skipping");
        return None;
    };
    Some(CompiledValidator {
        kind: config
            .kind
            .clone()
            .unwrap_or_else(|| default_kind.to_string()),
        when: config.when.clone(),
        rule: RuleKind::Async {
            function_name: function_name.clone(),
            params: config.params.clone(),
        },
    })
}

fn compile_async_http(config: &CustomValidatorConfig) -> Option<CompiledValidator> {
    let Some(function_name) = config
        .function_name
        .as_ref()
        .filter(|n| !n.trim().is_empty())
    else {
        log::warn!("customHttp validator requires functionName, skipping");
        return None;
    };
    Some(CompiledValidator {
        kind: config
            .kind
            .clone()
            .unwrap_or_else(|| "customHttp".to_string()),
        when: config.when.clone(),
        rule: RuleKind::Http {
            function_name: function_name.clone(),
            params: config.params.clone(),
        },
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::CustomFunctionMap;
    use crate::expression::ExpressionCache;
    use pretty_assertions::assert_eq;

    struct Harness {
        form: Value,
        functions: CustomFunctionMap,
        cache: ExpressionCache,
        registry: FunctionRegistry,
    }

    impl Harness {
        fn new(form: Value) -> Self {
            Self {
                form,
                functions: CustomFunctionMap::default(),
                cache: ExpressionCache::new(),
                registry: FunctionRegistry::new(),
            }
        }

        fn run(&self, validator: &CompiledValidator, value: &Value) -> Option<ValidationError> {
            let ctx = EvaluationContext {
                field_value: value,
                form_value: &self.form,
                field_path: "field",
                custom_functions: &self.functions,
                expressions: &self.cache,
            };
            let scope = RuleScope {
                ctx,
                registry: &self.registry,
            };
            if !validator.is_active(&scope) {
                return None;
            }
            match &validator.rule {
                RuleKind::Sync(rule) => rule(&scope),
                _ => panic!("expected a sync rule"),
            }
        }
    }

    fn compiled(config: Value) -> Option<CompiledValidator> {
        let config: ValidatorConfig = serde_json::from_value(config).unwrap();
        compile_validator(&config, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn unconfigured_builtin_attaches_nothing() {
        assert!(compiled(json!({"type": "min"})).is_none());
        assert!(compiled(json!({"type": "maxLength"})).is_none());
        // required and email need no constraint
        assert!(compiled(json!({"type": "required"})).is_some());
    }

    #[test]
    fn required_flags_empty_values_only() {
        let harness = Harness::new(json!({}));
        let rule = compiled(json!({"type": "required"})).unwrap();
        assert_eq!(harness.run(&rule, &json!("")).map(|e| e.kind), Some("required".into()));
        assert!(harness.run(&rule, &json!(null)).is_some());
        assert!(harness.run(&rule, &json!("x")).is_none());
        assert!(harness.run(&rule, &json!(0)).is_none());
    }

    #[test]
    fn min_compares_numerically_and_skips_empty() {
        let harness = Harness::new(json!({}));
        let rule = compiled(json!({"type": "min", "value": 10})).unwrap();
        assert!(harness.run(&rule, &json!(9)).is_some());
        assert!(harness.run(&rule, &json!("9")).is_some());
        assert!(harness.run(&rule, &json!(10)).is_none());
        assert!(harness.run(&rule, &json!(null)).is_none());
        assert!(harness.run(&rule, &json!("abc")).is_none());
    }

    #[test]
    fn expression_constraint_wins_over_static_value() {
        let harness = Harness::new(json!({"floor": 5}));
        let rule = compiled(json!({
            "type": "min",
            "value": 100,
            "expression": "formValue.floor"
        }))
        .unwrap();
        assert!(harness.run(&rule, &json!(4)).is_some());
        assert!(harness.run(&rule, &json!(6)).is_none());
    }

    #[test]
    fn length_bounds_count_characters_and_items() {
        let harness = Harness::new(json!({}));
        let min = compiled(json!({"type": "minLength", "value": 3})).unwrap();
        assert!(harness.run(&min, &json!("ab")).is_some());
        assert!(harness.run(&min, &json!("abc")).is_none());
        assert!(harness.run(&min, &json!(["a", "b"])).is_some());
        // empty is required's business, not minLength's
        assert!(harness.run(&min, &json!("")).is_none());

        let max = compiled(json!({"type": "maxLength", "value": 2})).unwrap();
        assert!(harness.run(&max, &json!("abc")).is_some());
        assert!(harness.run(&max, &json!("ab")).is_none());
    }

    #[test]
    fn static_pattern_compile_failure_is_a_hard_error() {
        let config: ValidatorConfig =
            serde_json::from_value(json!({"type": "pattern", "value": "("})).unwrap();
        assert!(matches!(
            compile_validator(&config, &BTreeMap::new()),
            Err(ValidatorError::InvalidPattern { .. })
        ));

        let config: ValidatorConfig =
            serde_json::from_value(json!({"type": "pattern", "value": 12})).unwrap();
        assert!(matches!(
            compile_validator(&config, &BTreeMap::new()),
            Err(ValidatorError::NonStringPattern { .. })
        ));
    }

    #[test]
    fn pattern_matches_coerced_value() {
        let harness = Harness::new(json!({}));
        let rule = compiled(json!({"type": "pattern", "value": "^\\d{4}$"})).unwrap();
        assert!(harness.run(&rule, &json!("1234")).is_none());
        assert!(harness.run(&rule, &json!("12")).is_some());
        assert!(harness.run(&rule, &json!(1234)).is_none());
    }

    #[test]
    fn email_accepts_reasonable_addresses() {
        let harness = Harness::new(json!({}));
        let rule = compiled(json!({"type": "email"})).unwrap();
        assert!(harness.run(&rule, &json!("ada@example.com")).is_none());
        assert!(harness.run(&rule, &json!("not-an-email")).is_some());
        assert!(harness.run(&rule, &json!("")).is_none());
    }

    #[test]
    fn when_condition_gates_activation() {
        let harness = Harness::new(json!({"country": "US"}));
        let rule = compiled(json!({
            "type": "required",
            "when": {"type": "fieldValue", "fieldPath": "country", "operator": "equals", "value": "DE"}
        }))
        .unwrap();
        assert!(harness.run(&rule, &json!("")).is_none());

        let harness = Harness::new(json!({"country": "DE"}));
        assert!(harness.run(&rule, &json!("")).is_some());
    }

    #[test]
    fn custom_expression_validator_reports_configured_kind() {
        let harness = Harness::new(json!({}));
        let rule = compiled(json!({
            "type": "custom",
            "expression": "fieldValue % 2 == 0",
            "kind": "evenNumber"
        }))
        .unwrap();
        let error = harness.run(&rule, &json!(3)).unwrap();
        assert_eq!(error.kind, "evenNumber");
        assert!(harness.run(&rule, &json!(4)).is_none());
    }

    #[test]
    fn custom_function_validator_resolves_through_registry() {
        let harness = Harness::new(json!({}));
        harness.registry.register_simple_validator("noAdmin", |value, _| {
            (value == &json!("admin"))
                .then(|| ValidationError::new("reserved", "reserved name"))
        });
        let rule = compiled(json!({
            "type": "custom",
            "functionName": "noAdmin",
            "kind": "usernameReserved"
        }))
        .unwrap();
        let error = harness.run(&rule, &json!("admin")).unwrap();
        // The configured kind keys the error map
        assert_eq!(error.kind, "usernameReserved");
        assert_eq!(error.message, "reserved name");
        assert!(harness.run(&rule, &json!("bob")).is_none());
    }

    #[test]
    fn unregistered_custom_function_skips() {
        let harness = Harness::new(json!({}));
        let rule = compiled(json!({"type": "custom", "functionName": "ghost"})).unwrap();
        assert!(harness.run(&rule, &json!("anything")).is_none());
    }

    #[test]
    fn custom_without_callable_compiles_to_nothing() {
        assert!(compiled(json!({"type": "custom"})).is_none());
        assert!(compiled(json!({"type": "customAsync"})).is_none());
        assert!(compiled(json!({"type": "customHttp"})).is_none());
    }

    #[test]
    fn async_rules_keep_their_function_name() {
        let rule = compiled(json!({"type": "customAsync", "functionName": "checkTaken"})).unwrap();
        assert_eq!(rule.kind, "customAsync");
        assert!(matches!(
            rule.rule,
            RuleKind::Async { ref function_name, .. } if function_name == "checkTaken"
        ));
    }

    #[test]
    fn message_overrides_interpolate_params() {
        let mut messages = BTreeMap::new();
        messages.insert("min".to_string(), "no less than {min}!".to_string());
        let config: ValidatorConfig =
            serde_json::from_value(json!({"type": "min", "value": 3})).unwrap();
        let rule = compile_validator(&config, &messages).unwrap().unwrap();

        let harness = Harness::new(json!({}));
        let error = harness.run(&rule, &json!(1)).unwrap();
        assert_eq!(error.message, "no less than 3!");
    }
}
