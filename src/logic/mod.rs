//! Logic applicator: compiles logic and validator configuration into bindings
//!
//! A binding pairs a target field with a recomputation: a state-logic boolean,
//! a derivation, or a validator rule. Each binding carries the dependency set
//! that retriggers it and its trigger timing. The engine owns the resulting
//! bindings and re-evaluates them during the reactive flush.
//!
//! All four state kinds, including `disabled`, bind through the same
//! surface; see DESIGN.md for the unification note.

use crate::ast::collect_form_dependencies;
use crate::condition::{ConditionalExpression, EvaluationContext, evaluate_condition};
use crate::config::{
    DerivationLogicConfig, FormStateCondition, LogicCondition, LogicConfig, Trigger, ValidatorConfig,
};
use crate::expression::{ExpressionCache, evaluate_expression};
use crate::validate::{CompiledValidator, ValidatorError, compile_validator};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Field attributes controlled by state logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Field visibility
    Hidden,
    /// Field editability
    Readonly,
    /// Field interactivity
    Disabled,
    /// Field requiredness
    Required,
}

/// Engine-global state visible to `FormStateCondition` logic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormStateSnapshot {
    /// Any field currently has validation errors
    pub form_invalid: bool,
    /// The form is being submitted
    pub form_submitting: bool,
    /// The active page has validation errors
    pub page_invalid: bool,
}

impl FormStateSnapshot {
    fn resolve(&self, condition: FormStateCondition) -> bool {
        match condition {
            FormStateCondition::FormInvalid => self.form_invalid,
            FormStateCondition::FormSubmitting => self.form_submitting,
            FormStateCondition::PageInvalid => self.page_invalid,
        }
    }
}

/// Everything a logic function may read
#[derive(Clone, Copy)]
pub struct LogicScope<'a> {
    /// Evaluation context of the binding's target field
    pub ctx: EvaluationContext<'a>,
    /// Engine-global state
    pub form_state: FormStateSnapshot,
}

/// A recomputable boolean bound to a field attribute
pub type LogicFn = Arc<dyn Fn(&LogicScope<'_>) -> bool + Send + Sync>;

/// A recomputable value for a derivation; `None` means "leave the field alone"
pub type DeriveFn = Arc<dyn Fn(&LogicScope<'_>) -> Option<Value> + Send + Sync>;

/// What a binding does when it fires
#[derive(Clone)]
pub enum BindingAction {
    /// Write a boolean to one field attribute
    State {
        /// Which attribute
        kind: StateKind,
        /// The bound logic function
        logic: LogicFn,
    },
    /// Compute and assign the target field's own value
    Derive {
        /// The bound derivation function
        derive: DeriveFn,
    },
    /// Contribute a validation rule to the target field
    Validate {
        /// The compiled rule
        rule: CompiledValidator,
        /// Extra activation gate from state logic, beyond the rule's `when`
        active: Option<LogicFn>,
    },
}

/// Dependency set retriggering a binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deps {
    /// Any change retriggers
    All,
    /// Only changes overlapping one of these paths retrigger
    Paths(FxHashSet<String>),
}

impl Deps {
    /// Whether a change at `changed` retriggers this dependency set.
    ///
    /// Paths overlap when either is a segment-prefix of the other, so a write
    /// to a whole subtree retriggers bindings on its leaves and vice versa.
    pub fn matches(&self, changed: &str) -> bool {
        match self {
            Deps::All => true,
            Deps::Paths(paths) => paths.iter().any(|path| paths_overlap(path, changed)),
        }
    }

    fn union(self, other: Deps) -> Deps {
        match (self, other) {
            (Deps::Paths(mut a), Deps::Paths(b)) => {
                a.extend(b);
                Deps::Paths(a)
            }
            _ => Deps::All,
        }
    }

    fn empty() -> Deps {
        Deps::Paths(FxHashSet::default())
    }

    fn single(path: impl Into<String>) -> Deps {
        let mut set = FxHashSet::default();
        set.insert(path.into());
        Deps::Paths(set)
    }
}

/// Whether one dot path is a segment-prefix of the other
pub fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
    long.starts_with(short) && long.as_bytes().get(short.len()) == Some(&b'.')
}

/// One compiled binding, owned by the engine
pub struct LogicBinding {
    /// Dot path of the field this binding writes to
    pub target: String,
    /// What the binding does
    pub action: BindingAction,
    /// When it recomputes
    pub trigger: Trigger,
    /// Debounce window for `Trigger::Debounced`
    pub debounce_ms: u64,
    /// Changes that retrigger it
    pub deps: Deps,
    /// Whether it must also re-run when engine-global state changes
    pub depends_on_form_state: bool,
    /// Debounce epoch; a pending timer whose epoch is stale was superseded
    epoch: AtomicU64,
}

impl LogicBinding {
    fn new(
        target: &str,
        action: BindingAction,
        trigger: Trigger,
        debounce_ms: u64,
        deps: Deps,
        depends_on_form_state: bool,
    ) -> Self {
        Self {
            target: target.to_string(),
            action,
            trigger,
            debounce_ms,
            deps,
            depends_on_form_state,
            epoch: AtomicU64::new(0),
        }
    }

    /// Invalidate pending timers and return the new epoch
    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Compile one logic entry into bindings for the field at `target`.
///
/// Unknown logic types compile to nothing and never fail. A `required` entry
/// produces two bindings: the state flag and a conditionally-active required
/// validator.
pub fn compile_logic(
    config: &LogicConfig,
    target: &str,
    messages: &BTreeMap<String, String>,
    cache: &ExpressionCache,
) -> Vec<LogicBinding> {
    let (trigger, debounce_ms) = config.timing();
    match config {
        LogicConfig::Hidden(state) => {
            state_binding(StateKind::Hidden, &state.condition, target, trigger, debounce_ms, cache)
        }
        LogicConfig::Readonly(state) => {
            state_binding(StateKind::Readonly, &state.condition, target, trigger, debounce_ms, cache)
        }
        LogicConfig::Disabled(state) => {
            state_binding(StateKind::Disabled, &state.condition, target, trigger, debounce_ms, cache)
        }
        LogicConfig::Required(state) => {
            let mut bindings = state_binding(
                StateKind::Required,
                &state.condition,
                target,
                trigger,
                debounce_ms,
                cache,
            );
            // Requiredness also attaches a conditionally-active required
            // validator, gated by the same logic function
            let (logic, deps, form_state) = build_logic_fn(&state.condition, cache);
            let required = ValidatorConfig::Required(Default::default());
            if let Ok(Some(rule)) = compile_validator(&required, messages) {
                bindings.push(LogicBinding::new(
                    target,
                    BindingAction::Validate {
                        rule,
                        active: Some(logic),
                    },
                    trigger,
                    debounce_ms,
                    deps.union(Deps::single(target)),
                    form_state,
                ));
            }
            bindings
        }
        LogicConfig::Derivation(derivation) => {
            derivation_binding(derivation, target, trigger, debounce_ms, cache)
                .into_iter()
                .collect()
        }
        LogicConfig::Unknown => {
            log::warn!("unknown logic type on '{target}', ignoring");
            Vec::new()
        }
    }
}

/// Compile one validator entry into a binding for the field at `target`.
///
/// `Ok(None)` means the validator is not configured and attaches nothing.
pub fn compile_field_validator(
    config: &ValidatorConfig,
    target: &str,
    messages: &BTreeMap<String, String>,
    cache: &ExpressionCache,
) -> Result<Option<LogicBinding>, ValidatorError> {
    let Some(rule) = compile_validator(config, messages)? else {
        return Ok(None);
    };
    let mut deps = Deps::single(target);
    if let Some(when) = &rule.when {
        deps = deps.union(condition_deps(when, cache));
    }
    if let Some(expression) = validator_constraint_expression(config) {
        deps = deps.union(expression_deps(expression, cache));
    }
    Ok(Some(LogicBinding::new(
        target,
        BindingAction::Validate { rule, active: None },
        Trigger::OnChange,
        0,
        deps,
        false,
    )))
}

fn validator_constraint_expression(config: &ValidatorConfig) -> Option<&str> {
    match config {
        ValidatorConfig::Min(b)
        | ValidatorConfig::Max(b)
        | ValidatorConfig::MinLength(b)
        | ValidatorConfig::MaxLength(b)
        | ValidatorConfig::Pattern(b) => b.expression.as_deref(),
        ValidatorConfig::Custom(c) => c.expression.as_deref(),
        _ => None,
    }
}

fn state_binding(
    kind: StateKind,
    condition: &LogicCondition,
    target: &str,
    trigger: Trigger,
    debounce_ms: u64,
    cache: &ExpressionCache,
) -> Vec<LogicBinding> {
    let (logic, deps, form_state) = build_logic_fn(condition, cache);
    vec![LogicBinding::new(
        target,
        BindingAction::State { kind, logic },
        trigger,
        debounce_ms,
        deps,
        form_state,
    )]
}

/// Build the reactive logic function for a condition.
///
/// Boolean conditions short-circuit to a constant function with no
/// dependencies; form-state conditions read engine-global state; expression
/// trees evaluate against the field's context.
pub fn build_logic_fn(
    condition: &LogicCondition,
    cache: &ExpressionCache,
) -> (LogicFn, Deps, bool) {
    match condition {
        LogicCondition::Constant(constant) => {
            let constant = *constant;
            (Arc::new(move |_| constant), Deps::empty(), false)
        }
        LogicCondition::FormState(state_condition) => {
            let state_condition = *state_condition;
            (
                Arc::new(move |scope: &LogicScope<'_>| scope.form_state.resolve(state_condition)),
                Deps::empty(),
                true,
            )
        }
        LogicCondition::Expression(expression) => {
            let deps = condition_deps(expression, cache);
            let expression = expression.clone();
            (
                Arc::new(move |scope: &LogicScope<'_>| evaluate_condition(&expression, &scope.ctx)),
                deps,
                false,
            )
        }
    }
}

fn derivation_binding(
    config: &DerivationLogicConfig,
    target: &str,
    trigger: Trigger,
    debounce_ms: u64,
    cache: &ExpressionCache,
) -> Option<LogicBinding> {
    enum Compute {
        Static(Value),
        Expression(String),
        Function(String),
    }

    let compute = if let Some(value) = &config.value {
        Compute::Static(value.clone())
    } else if let Some(expression) = config.expression.as_ref().filter(|e| !e.trim().is_empty()) {
        Compute::Expression(expression.clone())
    } else if let Some(name) = config.function_name.as_ref().filter(|n| !n.trim().is_empty()) {
        Compute::Function(name.clone())
    } else {
        // A derivation with nothing to compute is a valid no-op
        return None;
    };

    let (gate, gate_deps, form_state) = match &config.condition {
        Some(condition) => build_logic_fn(condition, cache),
        None => (Arc::new(|_: &LogicScope<'_>| true) as LogicFn, Deps::empty(), false),
    };

    let compute_deps = match (&config.depends_on, &compute) {
        (Some(depends_on), _) => {
            let mut set = FxHashSet::default();
            set.extend(depends_on.iter().cloned());
            Deps::Paths(set)
        }
        (None, Compute::Expression(source)) => expression_deps(source, cache),
        (None, Compute::Function(_)) => Deps::All,
        (None, Compute::Static(_)) => Deps::empty(),
    };

    let derive: DeriveFn = Arc::new(move |scope: &LogicScope<'_>| {
        if !gate(scope) {
            return None;
        }
        match &compute {
            Compute::Static(value) => Some(value.clone()),
            Compute::Expression(source) => {
                let compiled = match scope.ctx.expressions.get_or_compile(source) {
                    Ok(compiled) => compiled,
                    Err(error) => {
                        log::warn!("failed to parse derivation expression '{source}': {error}");
                        return None;
                    }
                };
                match evaluate_expression(&compiled, &scope.ctx.bindings()) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        log::warn!("failed to evaluate derivation expression '{source}': {error}");
                        None
                    }
                }
            }
            Compute::Function(name) => match scope.ctx.custom_functions.get(name) {
                Some(function) => Some(function(&scope.ctx)),
                None => {
                    log::warn!("derivation references unknown function '{name}'");
                    None
                }
            },
        }
    });

    Some(LogicBinding::new(
        target,
        BindingAction::Derive { derive },
        trigger,
        debounce_ms,
        compute_deps.union(gate_deps),
        form_state,
    ))
}

/// Dependencies of a condition tree
fn condition_deps(condition: &ConditionalExpression, cache: &ExpressionCache) -> Deps {
    match condition {
        ConditionalExpression::FieldValue { field_path, .. } => Deps::single(field_path.clone()),
        // Whole-form comparisons and opaque custom functions can read anything
        ConditionalExpression::FormValue { .. } | ConditionalExpression::Custom { .. } => Deps::All,
        ConditionalExpression::Javascript { expression } => match expression {
            Some(source) => expression_deps(source, cache),
            None => Deps::empty(),
        },
        ConditionalExpression::And { conditions } | ConditionalExpression::Or { conditions } => {
            conditions
                .iter()
                .map(|condition| condition_deps(condition, cache))
                .fold(Deps::empty(), Deps::union)
        }
        ConditionalExpression::Unknown => Deps::empty(),
    }
}

/// Dependencies of an expression string; unparsable expressions never
/// evaluate usefully, so they depend on nothing
fn expression_deps(source: &str, cache: &ExpressionCache) -> Deps {
    match cache.get_or_compile(source) {
        Ok(compiled) => match collect_form_dependencies(&compiled) {
            Some(paths) => Deps::Paths(paths),
            None => Deps::All,
        },
        Err(_) => Deps::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::CustomFunctionMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scope_ctx<'a>(
        field_value: &'a Value,
        form_value: &'a Value,
        functions: &'a CustomFunctionMap,
        cache: &'a ExpressionCache,
        form_state: FormStateSnapshot,
    ) -> LogicScope<'a> {
        LogicScope {
            ctx: EvaluationContext {
                field_value,
                form_value,
                field_path: "field",
                custom_functions: functions,
                expressions: cache,
            },
            form_state,
        }
    }

    #[test]
    fn paths_overlap_by_segment_prefix() {
        assert!(paths_overlap("items", "items.0.name"));
        assert!(paths_overlap("items.0.name", "items"));
        assert!(paths_overlap("a.b", "a.b"));
        assert!(!paths_overlap("item", "items"));
        assert!(!paths_overlap("a.b", "a.c"));
    }

    #[test]
    fn boolean_condition_compiles_to_a_constant() {
        let cache = ExpressionCache::new();
        let (logic, deps, form_state) = build_logic_fn(&LogicCondition::Constant(true), &cache);
        assert_eq!(deps, Deps::empty());
        assert!(!form_state);

        let functions = CustomFunctionMap::default();
        let (field, form) = (json!(null), json!({}));
        let scope = scope_ctx(&field, &form, &functions, &cache, FormStateSnapshot::default());
        assert!(logic(&scope));
    }

    #[test]
    fn form_state_condition_reads_engine_state() {
        let cache = ExpressionCache::new();
        let (logic, _, form_state) = build_logic_fn(
            &LogicCondition::FormState(FormStateCondition::FormSubmitting),
            &cache,
        );
        assert!(form_state);

        let functions = CustomFunctionMap::default();
        let (field, form) = (json!(null), json!({}));
        let submitting = FormStateSnapshot {
            form_submitting: true,
            ..Default::default()
        };
        assert!(logic(&scope_ctx(&field, &form, &functions, &cache, submitting)));
        assert!(!logic(&scope_ctx(
            &field,
            &form,
            &functions,
            &cache,
            FormStateSnapshot::default()
        )));
    }

    #[test]
    fn condition_deps_narrow_to_referenced_paths() {
        let cache = ExpressionCache::new();
        let condition: ConditionalExpression = serde_json::from_value(json!({
            "type": "and",
            "conditions": [
                {"type": "fieldValue", "fieldPath": "a.b", "operator": "equals", "value": 1},
                {"type": "javascript", "expression": "formValue.c > 2"}
            ]
        }))
        .unwrap();
        let deps = condition_deps(&condition, &cache);
        assert!(deps.matches("a.b"));
        assert!(deps.matches("a.b.c"));
        assert!(deps.matches("c"));
        assert!(!deps.matches("d"));
    }

    #[test]
    fn custom_conditions_depend_on_everything() {
        let cache = ExpressionCache::new();
        let deps = condition_deps(
            &ConditionalExpression::Custom {
                expression: Some("anything".into()),
            },
            &cache,
        );
        assert_eq!(deps, Deps::All);
    }

    #[test]
    fn unknown_logic_compiles_to_nothing() {
        let cache = ExpressionCache::new();
        let bindings = compile_logic(&LogicConfig::Unknown, "field", &BTreeMap::new(), &cache);
        assert!(bindings.is_empty());
    }

    #[test]
    fn required_logic_adds_a_gated_validator() {
        let cache = ExpressionCache::new();
        let config: LogicConfig = serde_json::from_value(json!({
            "type": "required",
            "condition": {"type": "fieldValue", "fieldPath": "plan", "operator": "equals", "value": "pro"}
        }))
        .unwrap();
        let bindings = compile_logic(&config, "field", &BTreeMap::new(), &cache);
        assert_eq!(bindings.len(), 2);
        assert!(matches!(
            bindings[0].action,
            BindingAction::State {
                kind: StateKind::Required,
                ..
            }
        ));
        assert!(matches!(
            bindings[1].action,
            BindingAction::Validate { active: Some(_), .. }
        ));
        assert!(bindings[1].deps.matches("plan"));
        assert!(bindings[1].deps.matches("field"));
    }

    #[test]
    fn empty_derivation_is_a_no_op() {
        let cache = ExpressionCache::new();
        let config: LogicConfig = serde_json::from_value(json!({"type": "derivation"})).unwrap();
        assert!(compile_logic(&config, "field", &BTreeMap::new(), &cache).is_empty());
    }

    #[test]
    fn derivation_deps_come_from_the_expression_unless_overridden() {
        let cache = ExpressionCache::new();
        let config: LogicConfig = serde_json::from_value(json!({
            "type": "derivation",
            "expression": "formValue.price * formValue.quantity"
        }))
        .unwrap();
        let bindings = compile_logic(&config, "total", &BTreeMap::new(), &cache);
        assert!(bindings[0].deps.matches("price"));
        assert!(bindings[0].deps.matches("quantity"));
        assert!(!bindings[0].deps.matches("total"));

        let config: LogicConfig = serde_json::from_value(json!({
            "type": "derivation",
            "expression": "formValue.price * formValue.quantity",
            "dependsOn": ["price"]
        }))
        .unwrap();
        let bindings = compile_logic(&config, "total", &BTreeMap::new(), &cache);
        assert!(bindings[0].deps.matches("price"));
        assert!(!bindings[0].deps.matches("quantity"));
    }

    #[test]
    fn derivation_gate_blocks_computation() {
        let cache = ExpressionCache::new();
        let config: LogicConfig = serde_json::from_value(json!({
            "type": "derivation",
            "value": 42,
            "condition": false
        }))
        .unwrap();
        let bindings = compile_logic(&config, "field", &BTreeMap::new(), &cache);
        let BindingAction::Derive { derive } = &bindings[0].action else {
            panic!("expected a derivation binding");
        };
        let functions = CustomFunctionMap::default();
        let (field, form) = (json!(null), json!({}));
        let scope = scope_ctx(&field, &form, &functions, &cache, FormStateSnapshot::default());
        assert_eq!(derive(&scope), None);
    }
}
