//! Declarative form configuration model
//!
//! The JSON-serializable types a form author writes: field definitions,
//! logic entries and validator entries. Schema validation of raw JSON happens
//! in [`validate`]; the engine additionally no-ops defensively on malformed
//! entries at evaluation time, since configs can also be built directly.

pub mod validate;

use crate::condition::ConditionalExpression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// When a logic binding recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// Synchronously within the same flush as the dependency change
    #[default]
    OnChange,
    /// After a quiet period following the last dependency change
    Debounced,
}

/// Default debounce window for `Trigger::Debounced`
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Engine-global states a state-logic condition can latch onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormStateCondition {
    /// Any field in the form currently has validation errors
    FormInvalid,
    /// The form is being submitted
    FormSubmitting,
    /// The active page has validation errors
    PageInvalid,
}

/// Condition attached to a logic entry: a constant, an engine-global state,
/// or a full conditional expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogicCondition {
    /// Constant condition, bound as-is without any subscription
    Constant(bool),
    /// Engine-global form state
    FormState(FormStateCondition),
    /// Conditional expression tree
    Expression(ConditionalExpression),
}

/// State-logic entry: binds a condition to one field attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateLogicConfig {
    /// Condition controlling the attribute
    pub condition: LogicCondition,
    /// Recomputation trigger; defaults to `onChange`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    /// Debounce window in milliseconds, meaningful only when debounced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

/// Derivation entry: computes and assigns the value of its own field
///
/// Exactly one of `value`, `expression` or `function_name` should be set;
/// with none of them the entry is a valid no-op.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationLogicConfig {
    /// Static value to assign
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expression computing the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Custom function computing the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Form paths that retrigger the derivation; inferred when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    /// Gate condition; defaults to always-on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<LogicCondition>,
    /// Recomputation trigger; defaults to `onChange`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    /// Debounce window in milliseconds, meaningful only when debounced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

/// A logic entry bound to a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogicConfig {
    /// Hide the field while the condition holds
    Hidden(StateLogicConfig),
    /// Make the field read-only while the condition holds
    Readonly(StateLogicConfig),
    /// Disable the field while the condition holds
    Disabled(StateLogicConfig),
    /// Make the field required while the condition holds
    Required(StateLogicConfig),
    /// Compute the field's own value
    Derivation(DerivationLogicConfig),
    /// Unrecognized logic type; applying it is a no-op
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl LogicConfig {
    /// Trigger/debounce settings of this entry
    pub fn timing(&self) -> (Trigger, u64) {
        let (trigger, debounce_ms) = match self {
            LogicConfig::Hidden(c)
            | LogicConfig::Readonly(c)
            | LogicConfig::Disabled(c)
            | LogicConfig::Required(c) => (c.trigger, c.debounce_ms),
            LogicConfig::Derivation(c) => (c.trigger, c.debounce_ms),
            LogicConfig::Unknown => (None, None),
        };
        (
            trigger.unwrap_or_default(),
            debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
        )
    }
}

/// Settings shared by the built-in validators
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltinValidatorConfig {
    /// Static constraint value (threshold, length, pattern source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expression recomputing the constraint; wins over `value` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Condition gating whether the validator is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<ConditionalExpression>,
    /// Override for the rendered error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Settings for custom, async and remote validators
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomValidatorConfig {
    /// Registered validator function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Inline expression; truthy means valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Opaque parameters forwarded to the validator function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Error kind the produced error is keyed under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Parameters interpolated into the error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_params: Option<Value>,
    /// Condition gating whether the validator is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<ConditionalExpression>,
}

/// A validator entry bound to a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValidatorConfig {
    /// Non-empty value required
    Required(BuiltinValidatorConfig),
    /// Well-formed email address
    Email(BuiltinValidatorConfig),
    /// Numeric lower bound
    Min(BuiltinValidatorConfig),
    /// Numeric upper bound
    Max(BuiltinValidatorConfig),
    /// Minimum string length
    MinLength(BuiltinValidatorConfig),
    /// Maximum string length
    MaxLength(BuiltinValidatorConfig),
    /// Regular-expression match
    Pattern(BuiltinValidatorConfig),
    /// Registered or inline synchronous validator
    Custom(CustomValidatorConfig),
    /// Registered asynchronous validator
    CustomAsync(CustomValidatorConfig),
    /// Registered remote-validation descriptor resolver
    CustomHttp(CustomValidatorConfig),
    /// Unrecognized validator type; applying it is a no-op
    #[serde(other, rename = "unknown")]
    Unknown,
}

/// Reference to a schema application: by name or inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaRef {
    /// Resolved through the schema registry
    Name(String),
    /// Inline bundle
    Inline(SchemaApplicationConfig),
}

/// Named, reusable bundle of validators and logic
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaApplicationConfig {
    /// Registry name of the bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Validators merged into the field's own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorConfig>,
    /// Logic entries merged into the field's own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logic: Vec<LogicConfig>,
}

/// Kind of a field definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    /// Free-text input
    Text,
    /// Numeric input
    Number,
    /// Boolean input
    Checkbox,
    /// Single choice from options
    Select,
    /// Date input
    Date,
    /// Layout container; children keep the parent's path scope
    Row,
    /// Grouping container; children nest under the group's id
    Group,
    /// Repeating container; children nest under numeric indices
    Array,
    /// Paging container; children keep the parent's path scope
    Page,
    /// Action button
    Button,
    /// Any other widget kind; treated as a plain value field
    #[serde(other)]
    Other,
}

impl FieldType {
    /// Whether this field holds children instead of a value
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            FieldType::Row | FieldType::Group | FieldType::Array | FieldType::Page
        )
    }

    /// Whether children nest under this field's id in the value tree
    pub fn scopes_children(&self) -> bool {
        matches!(self, FieldType::Group | FieldType::Array)
    }
}

/// One field definition in a form configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    /// Field identifier; one segment of the field's dot path
    pub id: String,
    /// Widget kind
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Display label; forbidden on containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Child fields of a container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldConfig>,
    /// Template for array entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Box<FieldConfig>>,
    /// Initial value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Validator entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorConfig>,
    /// Logic entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logic: Vec<LogicConfig>,
    /// Per-kind overrides for rendered error messages
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation_messages: BTreeMap<String, String>,
    /// Schema applications merged into this field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<SchemaRef>,
    /// Unrecognized keys, kept for configuration-time diagnostics
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// A complete form configuration: an ordered list of field definitions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormConfig {
    /// Top-level fields in render order
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn logic_config_decodes_all_families() {
        let configs: Vec<LogicConfig> = serde_json::from_value(json!([
            {"type": "hidden", "condition": {"type": "fieldValue", "fieldPath": "a", "operator": "equals", "value": 1}},
            {"type": "required", "condition": true},
            {"type": "readonly", "condition": "formSubmitting"},
            {"type": "derivation", "expression": "formValue.a * 2", "dependsOn": ["a"], "trigger": "debounced", "debounceMs": 250},
            {"type": "teleport", "condition": true}
        ]))
        .unwrap();

        assert!(matches!(configs[0], LogicConfig::Hidden(_)));
        assert_eq!(
            configs[1],
            LogicConfig::Required(StateLogicConfig {
                condition: LogicCondition::Constant(true),
                trigger: None,
                debounce_ms: None,
            })
        );
        assert_eq!(
            configs[2],
            LogicConfig::Readonly(StateLogicConfig {
                condition: LogicCondition::FormState(FormStateCondition::FormSubmitting),
                trigger: None,
                debounce_ms: None,
            })
        );
        match &configs[3] {
            LogicConfig::Derivation(derivation) => {
                assert_eq!(derivation.depends_on, Some(vec!["a".to_string()]));
                assert_eq!(derivation.trigger, Some(Trigger::Debounced));
                assert_eq!(derivation.debounce_ms, Some(250));
            }
            other => panic!("expected derivation, got {other:?}"),
        }
        assert_eq!(configs[4], LogicConfig::Unknown);
    }

    #[test]
    fn validator_config_decodes_builtins_and_custom() {
        let configs: Vec<ValidatorConfig> = serde_json::from_value(json!([
            {"type": "required"},
            {"type": "minLength", "value": 3},
            {"type": "min", "expression": "formValue.floor + 1"},
            {"type": "custom", "functionName": "checkTaken", "kind": "usernameTaken"},
            {"type": "levitate"}
        ]))
        .unwrap();

        assert!(matches!(configs[0], ValidatorConfig::Required(_)));
        assert!(
            matches!(&configs[1], ValidatorConfig::MinLength(c) if c.value == Some(json!(3)))
        );
        assert!(matches!(&configs[2], ValidatorConfig::Min(c) if c.expression.is_some()));
        assert!(
            matches!(&configs[3], ValidatorConfig::Custom(c) if c.function_name.as_deref() == Some("checkTaken"))
        );
        assert_eq!(configs[4], ValidatorConfig::Unknown);
    }

    #[test]
    fn field_config_keeps_unknown_keys_for_diagnostics() {
        let field: FieldConfig = serde_json::from_value(json!({
            "id": "email",
            "type": "text",
            "hideWhen": {"type": "fieldValue", "fieldPath": "x", "operator": "equals", "value": 1}
        }))
        .unwrap();
        assert!(field.extra.contains_key("hideWhen"));
    }

    #[test]
    fn schema_refs_decode_by_name_or_inline() {
        let refs: Vec<SchemaRef> = serde_json::from_value(json!([
            "usernameRules",
            {"validators": [{"type": "required"}]}
        ]))
        .unwrap();
        assert_eq!(refs[0], SchemaRef::Name("usernameRules".into()));
        assert!(
            matches!(&refs[1], SchemaRef::Inline(schema) if schema.validators.len() == 1)
        );
    }

    #[test]
    fn default_timing_is_synchronous() {
        let config = LogicConfig::Hidden(StateLogicConfig {
            condition: LogicCondition::Constant(true),
            trigger: None,
            debounce_ms: None,
        });
        assert_eq!(config.timing(), (Trigger::OnChange, DEFAULT_DEBOUNCE_MS));
    }
}
