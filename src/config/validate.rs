//! Configuration-time validation
//!
//! Walks a [`FormConfig`] and reports structured, field-path-annotated
//! diagnostics before the engine consumes it: unknown keys with "did you
//! mean" hints for known anti-patterns, incomplete custom validators,
//! unparsable expressions and patterns, and shape violations on containers.
//!
//! The engine still no-ops defensively on malformed entries at evaluation
//! time; this layer exists to tell the author about them.

use super::{
    FieldConfig, FieldType, FormConfig, LogicCondition, LogicConfig, SchemaRef, ValidatorConfig,
};
use crate::condition::ConditionalExpression;
use crate::diagnostics::{ConfigDiagnostic, DiagnosticCode, Severity};
use crate::parser::parse_expression;
use crate::registry::SchemaRegistry;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// Validate a form configuration, optionally resolving schema references
/// against a registry
pub fn validate_form_config(
    config: &FormConfig,
    schemas: Option<&SchemaRegistry>,
) -> Vec<ConfigDiagnostic> {
    let mut diagnostics = Vec::new();
    validate_fields(&config.fields, "", schemas, &mut diagnostics);
    diagnostics
}

fn validate_fields(
    fields: &[FieldConfig],
    prefix: &str,
    schemas: Option<&SchemaRegistry>,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) {
    let mut seen_ids = HashSet::new();
    for field in fields {
        let path = if prefix.is_empty() {
            field.id.clone()
        } else {
            format!("{prefix}.{}", field.id)
        };

        if !seen_ids.insert(field.id.clone()) {
            diagnostics.push(ConfigDiagnostic::error(
                DiagnosticCode::DuplicateFieldId(field.id.clone()),
                path.clone(),
                format!("duplicate field id '{}' in the same container", field.id),
            ));
        }

        validate_extra_keys(field, &path, diagnostics);
        validate_shape(field, &path, diagnostics);

        for logic in &field.logic {
            validate_logic(logic, field, &path, diagnostics);
        }
        for validator in &field.validators {
            validate_validator(validator, &path, diagnostics);
        }
        for reference in &field.schemas {
            if let (SchemaRef::Name(name), Some(registry)) = (reference, schemas) {
                if registry.get_schema(name).is_none() {
                    diagnostics.push(ConfigDiagnostic::warning(
                        DiagnosticCode::UnknownSchema(name.clone()),
                        path.clone(),
                        format!("schema '{name}' is not registered"),
                    ));
                }
            }
        }

        let child_prefix = if field.field_type.scopes_children() {
            path.clone()
        } else {
            prefix.to_string()
        };
        validate_fields(&field.fields, &child_prefix, schemas, diagnostics);
    }
}

/// Known anti-pattern keys and what the author probably meant
fn anti_pattern_hint(key: &str) -> Option<&'static str> {
    match key {
        "hideWhen" | "showWhen" => {
            Some("did you mean a logic entry: {\"type\": \"hidden\", \"condition\": ...}?")
        }
        "readonlyWhen" => {
            Some("did you mean a logic entry: {\"type\": \"readonly\", \"condition\": ...}?")
        }
        "disableWhen" | "disabledWhen" => {
            Some("did you mean a logic entry: {\"type\": \"disabled\", \"condition\": ...}?")
        }
        "requiredWhen" | "require" | "isRequired" => {
            Some("did you mean a logic entry: {\"type\": \"required\", \"condition\": ...}?")
        }
        "validator" => Some("did you mean 'validators'?"),
        "validationMessage" => Some("did you mean 'validationMessages'?"),
        "computed" | "derive" | "computeValue" => {
            Some("did you mean a logic entry: {\"type\": \"derivation\", ...}?")
        }
        _ => None,
    }
}

fn validate_extra_keys(field: &FieldConfig, path: &str, diagnostics: &mut Vec<ConfigDiagnostic>) {
    for key in field.extra.keys() {
        let mut diagnostic = ConfigDiagnostic::warning(
            DiagnosticCode::UnknownKey(key.clone()),
            path,
            format!("unknown key '{key}'"),
        );
        if let Some(hint) = anti_pattern_hint(key) {
            diagnostic.severity = Severity::Error;
            diagnostic = diagnostic.with_suggestion(hint);
        }
        diagnostics.push(diagnostic);
    }
}

fn validate_shape(field: &FieldConfig, path: &str, diagnostics: &mut Vec<ConfigDiagnostic>) {
    if field.field_type.is_container() && field.label.is_some() {
        diagnostics.push(ConfigDiagnostic::error(
            DiagnosticCode::InvalidContainerKey("label".into()),
            path,
            "container fields cannot carry a label",
        ));
    }
    if field.field_type == FieldType::Array {
        if field.template.is_some() {
            diagnostics.push(ConfigDiagnostic::error(
                DiagnosticCode::InvalidArrayKey("template".into()),
                path,
                "array fields cannot carry a template",
            ));
        }
        for key in ["minItems", "maxItems"] {
            if field.extra.contains_key(key) {
                diagnostics.push(ConfigDiagnostic::error(
                    DiagnosticCode::InvalidArrayKey(key.into()),
                    path,
                    format!("array fields cannot carry '{key}'"),
                ));
            }
        }
    }
}

fn validate_logic(
    logic: &LogicConfig,
    field: &FieldConfig,
    path: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) {
    if field.field_type.is_container() && !matches!(logic, LogicConfig::Hidden(_)) {
        diagnostics.push(ConfigDiagnostic::error(
            DiagnosticCode::LogicNotAllowed,
            path,
            "only hidden logic is permitted on container fields",
        ));
    }
    match logic {
        LogicConfig::Hidden(state)
        | LogicConfig::Readonly(state)
        | LogicConfig::Disabled(state)
        | LogicConfig::Required(state) => {
            validate_logic_condition(&state.condition, path, diagnostics);
        }
        LogicConfig::Derivation(derivation) => {
            if let Some(expression) = &derivation.expression {
                check_expression(expression, path, diagnostics);
            }
            if let Some(condition) = &derivation.condition {
                validate_logic_condition(condition, path, diagnostics);
            }
        }
        LogicConfig::Unknown => {
            diagnostics.push(ConfigDiagnostic::warning(
                DiagnosticCode::UnknownLogicType,
                path,
                "unknown logic type; the entry will be ignored",
            ));
        }
    }
}

fn validate_logic_condition(
    condition: &LogicCondition,
    path: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) {
    if let LogicCondition::Expression(expression) = condition {
        validate_condition(expression, path, diagnostics);
    }
}

fn validate_condition(
    condition: &ConditionalExpression,
    path: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) {
    match condition {
        ConditionalExpression::FieldValue { operator: None, .. }
        | ConditionalExpression::FormValue { operator: None, .. } => {
            diagnostics.push(ConfigDiagnostic::warning(
                DiagnosticCode::MissingOperator,
                path,
                "comparison condition has no operator and will always be false",
            ));
        }
        ConditionalExpression::Javascript {
            expression: Some(expression),
        } => check_expression(expression, path, diagnostics),
        ConditionalExpression::And { conditions } | ConditionalExpression::Or { conditions } => {
            for condition in conditions {
                validate_condition(condition, path, diagnostics);
            }
        }
        ConditionalExpression::Unknown => {
            diagnostics.push(ConfigDiagnostic::warning(
                DiagnosticCode::UnknownLogicType,
                path,
                "unknown condition type; it will always evaluate to false",
            ));
        }
        _ => {}
    }
}

fn validate_validator(
    validator: &ValidatorConfig,
    path: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) {
    match validator {
        ValidatorConfig::Pattern(builtin) => {
            match &builtin.value {
                Some(Value::String(pattern)) => {
                    if let Err(error) = Regex::new(pattern) {
                        diagnostics.push(ConfigDiagnostic::error(
                            DiagnosticCode::InvalidPattern,
                            path,
                            format!("pattern '{pattern}' does not compile: {error}"),
                        ));
                    }
                }
                Some(other) => {
                    diagnostics.push(ConfigDiagnostic::error(
                        DiagnosticCode::InvalidPattern,
                        path,
                        format!(
                            "pattern constraint must be a string, got {}",
                            type_label(other)
                        ),
                    ));
                }
                None => {}
            }
            validate_builtin_shared(builtin, path, diagnostics);
        }
        ValidatorConfig::Required(builtin)
        | ValidatorConfig::Email(builtin)
        | ValidatorConfig::Min(builtin)
        | ValidatorConfig::Max(builtin)
        | ValidatorConfig::MinLength(builtin)
        | ValidatorConfig::MaxLength(builtin) => {
            validate_builtin_shared(builtin, path, diagnostics);
        }
        ValidatorConfig::Custom(custom) => {
            let has_function = custom
                .function_name
                .as_deref()
                .is_some_and(|n| !n.trim().is_empty());
            let has_expression = custom
                .expression
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty());
            if !has_function && !has_expression {
                diagnostics.push(
                    ConfigDiagnostic::error(
                        DiagnosticCode::CustomValidatorIncomplete,
                        path,
                        "custom validator needs 'functionName' or 'expression'",
                    )
                    .with_suggestion(
                        "set functionName to a registered validator, or provide an expression",
                    ),
                );
            }
            if let Some(expression) = &custom.expression {
                check_expression(expression, path, diagnostics);
            }
            if let Some(when) = &custom.when {
                validate_condition(when, path, diagnostics);
            }
        }
        ValidatorConfig::CustomAsync(custom) | ValidatorConfig::CustomHttp(custom) => {
            if custom
                .function_name
                .as_deref()
                .is_none_or(|n| n.trim().is_empty())
            {
                diagnostics.push(ConfigDiagnostic::error(
                    DiagnosticCode::MissingFunctionName,
                    path,
                    "asynchronous validators need 'functionName'",
                ));
            }
            if let Some(when) = &custom.when {
                validate_condition(when, path, diagnostics);
            }
        }
        ValidatorConfig::Unknown => {
            diagnostics.push(ConfigDiagnostic::warning(
                DiagnosticCode::UnknownValidatorType,
                path,
                "unknown validator type; the entry will be ignored",
            ));
        }
    }
}

fn validate_builtin_shared(
    builtin: &super::BuiltinValidatorConfig,
    path: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) {
    if let Some(expression) = &builtin.expression {
        check_expression(expression, path, diagnostics);
    }
    if let Some(when) = &builtin.when {
        validate_condition(when, path, diagnostics);
    }
}

fn check_expression(expression: &str, path: &str, diagnostics: &mut Vec<ConfigDiagnostic>) {
    if expression.trim().is_empty() {
        return;
    }
    if let Err(error) = parse_expression(expression) {
        diagnostics.push(ConfigDiagnostic::warning(
            DiagnosticCode::InvalidExpression,
            path,
            format!("expression '{expression}' does not parse and will evaluate to nothing: {error}"),
        ));
    }
}

fn type_label(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn parse_config(value: Value) -> FormConfig {
        serde_json::from_value(value).unwrap()
    }

    fn diagnose(value: Value) -> Vec<ConfigDiagnostic> {
        validate_form_config(&parse_config(value), None)
    }

    #[test]
    fn clean_config_produces_no_diagnostics() {
        let diagnostics = diagnose(json!({
            "fields": [
                {"id": "email", "type": "text", "validators": [{"type": "required"}, {"type": "email"}]},
                {"id": "age", "type": "number", "validators": [{"type": "min", "value": 0}]}
            ]
        }));
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn hide_when_gets_a_did_you_mean() {
        let diagnostics = diagnose(json!({
            "fields": [
                {"id": "phone", "type": "text", "hideWhen": {"type": "fieldValue"}}
            ]
        }));
        let diagnostic = &diagnostics[0];
        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.field_path, "phone");
        assert!(diagnostic.suggestion.as_ref().unwrap().contains("hidden"));
    }

    #[test]
    fn custom_validator_without_callable_is_flagged() {
        let diagnostics = diagnose(json!({
            "fields": [
                {"id": "name", "type": "text", "validators": [{"type": "custom"}]}
            ]
        }));
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::CustomValidatorIncomplete));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let diagnostics = diagnose(json!({
            "fields": [
                {"id": "zip", "type": "text", "validators": [{"type": "pattern", "value": "("}]}
            ]
        }));
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::InvalidPattern && d.severity == Severity::Error));
    }

    #[test]
    fn container_shape_violations_are_flagged() {
        let diagnostics = diagnose(json!({
            "fields": [{
                "id": "address",
                "type": "group",
                "label": "Address",
                "logic": [{"type": "readonly", "condition": true}],
                "fields": [{"id": "city", "type": "text"}]
            }]
        }));
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d.code, DiagnosticCode::InvalidContainerKey(_))));
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::LogicNotAllowed));
    }

    #[test]
    fn hidden_logic_is_allowed_on_containers() {
        let diagnostics = diagnose(json!({
            "fields": [{
                "id": "extras",
                "type": "group",
                "logic": [{"type": "hidden", "condition": true}],
                "fields": [{"id": "note", "type": "text"}]
            }]
        }));
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn missing_operator_is_warned_about() {
        let diagnostics = diagnose(json!({
            "fields": [{
                "id": "a",
                "type": "text",
                "logic": [{"type": "hidden", "condition": {"type": "fieldValue", "fieldPath": "b", "value": 1}}]
            }]
        }));
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::MissingOperator));
    }

    #[test]
    fn unparsable_expressions_are_warned_about() {
        let diagnostics = diagnose(json!({
            "fields": [{
                "id": "total",
                "type": "number",
                "logic": [{"type": "derivation", "expression": "formValue.a *"}]
            }]
        }));
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::InvalidExpression));
    }

    #[test]
    fn duplicate_ids_in_one_scope_are_errors() {
        let diagnostics = diagnose(json!({
            "fields": [
                {"id": "a", "type": "text"},
                {"id": "a", "type": "number"}
            ]
        }));
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d.code, DiagnosticCode::DuplicateFieldId(_))));
    }

    #[test]
    fn unknown_schema_names_are_flagged_with_a_registry() {
        let registry = SchemaRegistry::new();
        let config = parse_config(json!({
            "fields": [{"id": "a", "type": "text", "schemas": ["ghost"]}]
        }));
        let diagnostics = validate_form_config(&config, Some(&registry));
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d.code, DiagnosticCode::UnknownSchema(_))));
    }

    #[test]
    fn array_fields_reject_template_and_item_bounds() {
        let diagnostics = diagnose(json!({
            "fields": [{
                "id": "items",
                "type": "array",
                "template": {"id": "item", "type": "text"},
                "minItems": 1
            }]
        }));
        assert_eq!(
            diagnostics
                .iter()
                .filter(|d| matches!(d.code, DiagnosticCode::InvalidArrayKey(_)))
                .count(),
            2
        );
    }
}
