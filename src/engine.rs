//! Form engine - the main entry point for form logic evaluation
//!
//! A [`FormEngine`] owns one form: its value tree, field nodes, registries
//! and compiled bindings. Value changes flush synchronously on the caller's
//! thread; debounced bindings and async validators run on the ambient tokio
//! runtime and re-enter the engine through weak handles, so a disposed engine
//! or destroyed field silently absorbs late work.

use crate::condition::EvaluationContext;
use crate::config::{FieldConfig, FormConfig, LogicConfig, Trigger, ValidatorConfig};
use crate::diagnostics::ConfigDiagnostic;
use crate::expression::ExpressionCache;
use crate::form::{FieldNode, FieldRegistry, FieldState};
use crate::logic::{
    BindingAction, FormStateSnapshot, LogicBinding, LogicScope, StateKind, compile_field_validator,
    compile_logic,
};
use crate::model::{get_nested_value, set_nested_value, strict_value_equals};
use crate::registry::{FunctionRegistry, SchemaRegistry};
use crate::validate::{
    ASYNC_FAILED_KIND, AsyncValidationError, RemoteTransport, RuleKind, RuleScope,
    ValidationError, ValidationRequest, ValidatorError,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Cap on cascading propagation passes within one flush; a configuration
/// whose derivations keep feeding each other past this is cyclic
const MAX_PROPAGATION_PASSES: usize = 16;

/// Main engine for declarative form logic and validation
#[derive(Clone)]
pub struct FormEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    form: RwLock<Value>,
    fields: FieldRegistry,
    functions: FunctionRegistry,
    schemas: SchemaRegistry,
    bindings: RwLock<Vec<Arc<LogicBinding>>>,
    flags: RwLock<RuntimeFlags>,
    last_form_state: RwLock<FormStateSnapshot>,
    expressions: ExpressionCache,
    transport: RwLock<Option<Arc<dyn RemoteTransport>>>,
    disposed: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default)]
struct RuntimeFlags {
    submitting: bool,
    page_invalid: bool,
}

impl Default for FormEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormEngine {
    /// Create an engine with an empty form
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                form: RwLock::new(Value::Object(serde_json::Map::new())),
                fields: FieldRegistry::new(),
                functions: FunctionRegistry::new(),
                schemas: SchemaRegistry::new(),
                bindings: RwLock::new(Vec::new()),
                flags: RwLock::new(RuntimeFlags::default()),
                last_form_state: RwLock::new(FormStateSnapshot::default()),
                expressions: ExpressionCache::new(),
                transport: RwLock::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The engine's function registry
    pub fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }

    /// The engine's schema registry
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    /// Install the transport executing `customHttp` descriptors
    pub fn set_remote_transport(&self, transport: Arc<dyn RemoteTransport>) {
        *self.inner.transport.write() = Some(transport);
    }

    /// Validate a configuration against this engine's schema registry,
    /// returning structured diagnostics
    pub fn validate_config(&self, config: &FormConfig) -> Vec<ConfigDiagnostic> {
        crate::config::validate::validate_form_config(config, Some(&self.inner.schemas))
    }

    /// Mount a form configuration: register fields, seed default values,
    /// resolve schema applications and bind all logic and validators.
    ///
    /// Fails hard on pattern validators that do not compile.
    pub fn mount(&self, config: &FormConfig) -> Result<(), ValidatorError> {
        self.mount_fields(&config.fields, "")?;
        self.run_flush(FlushInput::Everything);
        Ok(())
    }

    fn mount_fields(&self, fields: &[FieldConfig], prefix: &str) -> Result<(), ValidatorError> {
        for field in fields {
            let path = if prefix.is_empty() {
                field.id.clone()
            } else {
                format!("{prefix}.{}", field.id)
            };
            self.inner.fields.register(&path);

            if let Some(default_value) = &field.default_value {
                let mut form = self.inner.form.write();
                set_nested_value(&mut form, &path, default_value.clone());
            }

            // Schema bundles apply before the field's own entries, so the
            // field's own configuration wins where both touch one attribute
            for reference in &field.schemas {
                if let Some(schema) = self.inner.schemas.resolve_schema(reference) {
                    for validator in &schema.validators {
                        self.bind_validator(&path, validator, &field.validation_messages)?;
                    }
                    for logic in &schema.logic {
                        self.bind_logic(&path, logic, &field.validation_messages);
                    }
                }
            }
            for validator in &field.validators {
                self.bind_validator(&path, validator, &field.validation_messages)?;
            }
            for logic in &field.logic {
                self.bind_logic(&path, logic, &field.validation_messages);
            }

            let child_prefix = if field.field_type.scopes_children() {
                path.clone()
            } else {
                prefix.to_string()
            };
            self.mount_fields(&field.fields, &child_prefix)?;
        }
        Ok(())
    }

    /// Get or create the field node at a path
    pub fn register_field(&self, path: &str) -> Arc<FieldNode> {
        self.inner.fields.register(path)
    }

    /// Look up a field node
    pub fn field(&self, path: &str) -> Option<Arc<FieldNode>> {
        self.inner.fields.get(path)
    }

    /// Snapshot of a field's reactive state
    pub fn field_state(&self, path: &str) -> Option<FieldState> {
        self.inner.fields.get(path).map(|node| node.snapshot())
    }

    /// Apply one logic entry to the field at `path`.
    ///
    /// Each call binds independently: applying the same entry twice
    /// double-binds, and later entries targeting the same attribute win.
    pub fn apply_logic(&self, path: &str, config: &LogicConfig) {
        self.register_field(path);
        self.bind_logic(path, config, &BTreeMap::new());
        self.run_flush(FlushInput::Everything);
    }

    /// Apply logic entries in array order
    pub fn apply_multiple_logic(&self, path: &str, configs: &[LogicConfig]) {
        self.register_field(path);
        for config in configs {
            self.bind_logic(path, config, &BTreeMap::new());
        }
        self.run_flush(FlushInput::Everything);
    }

    /// Apply one validator entry to the field at `path`
    pub fn apply_validator(&self, path: &str, config: &ValidatorConfig) -> Result<(), ValidatorError> {
        self.register_field(path);
        self.bind_validator(path, config, &BTreeMap::new())?;
        self.run_flush(FlushInput::Everything);
        Ok(())
    }

    /// Apply validator entries independently; their errors combine into one
    /// map keyed by validator kind
    pub fn apply_validators(
        &self,
        path: &str,
        configs: &[ValidatorConfig],
    ) -> Result<(), ValidatorError> {
        self.register_field(path);
        for config in configs {
            self.bind_validator(path, config, &BTreeMap::new())?;
        }
        self.run_flush(FlushInput::Everything);
        Ok(())
    }

    fn bind_logic(&self, path: &str, config: &LogicConfig, messages: &BTreeMap<String, String>) {
        let bindings = compile_logic(config, path, messages, &self.inner.expressions);
        let mut all = self.inner.bindings.write();
        all.extend(bindings.into_iter().map(Arc::new));
    }

    fn bind_validator(
        &self,
        path: &str,
        config: &ValidatorConfig,
        messages: &BTreeMap<String, String>,
    ) -> Result<(), ValidatorError> {
        if let Some(binding) =
            compile_field_validator(config, path, messages, &self.inner.expressions)?
        {
            self.inner.bindings.write().push(Arc::new(binding));
        }
        Ok(())
    }

    /// Current value at a path
    pub fn value(&self, path: &str) -> Option<Value> {
        get_nested_value(&self.inner.form.read(), path).cloned()
    }

    /// Snapshot of the whole form value tree
    pub fn form_value(&self) -> Value {
        self.inner.form.read().clone()
    }

    /// Write a value and synchronously flush every dependent binding
    pub fn set_value(&self, path: &str, value: Value) {
        if self.is_disposed() {
            return;
        }
        {
            let mut form = self.inner.form.write();
            if !set_nested_value(&mut form, path, value) {
                log::warn!("cannot write value at '{path}': path runs through a non-container");
                return;
            }
        }
        self.run_flush(FlushInput::Changed(vec![path.to_string()]));
    }

    /// Whether every field is currently valid
    pub fn is_valid(&self) -> bool {
        self.inner.fields.all_valid()
    }

    /// Whether any field has async validation in flight
    pub fn is_pending(&self) -> bool {
        self.inner
            .fields
            .nodes()
            .iter()
            .any(|node| node.is_pending())
    }

    /// Flag the form as submitting, re-running form-state logic
    pub fn set_submitting(&self, submitting: bool) {
        self.inner.flags.write().submitting = submitting;
        self.run_flush(FlushInput::Changed(Vec::new()));
    }

    /// Flag the active page as invalid, re-running form-state logic
    pub fn set_page_invalid(&self, page_invalid: bool) {
        self.inner.flags.write().page_invalid = page_invalid;
        self.run_flush(FlushInput::Changed(Vec::new()));
    }

    /// Re-run every validator on every field, e.g. before submit
    pub fn validate_all(&self) -> bool {
        let targets: Vec<String> = {
            let bindings = self.inner.bindings.read();
            let mut targets: Vec<String> = Vec::new();
            for binding in bindings.iter() {
                if matches!(binding.action, BindingAction::Validate { .. })
                    && !targets.contains(&binding.target)
                {
                    targets.push(binding.target.clone());
                }
            }
            targets
        };
        for target in targets {
            self.revalidate_field(&target);
        }
        self.run_flush(FlushInput::Changed(Vec::new()));
        self.is_valid()
    }

    /// Destroy a field: release its bindings, cancel pending debounce timers
    /// and discard in-flight async validations
    pub fn destroy_field(&self, path: &str) {
        {
            let mut bindings = self.inner.bindings.write();
            bindings.retain(|binding| {
                if binding.target == path {
                    binding.bump_epoch();
                    false
                } else {
                    true
                }
            });
        }
        self.inner.fields.remove(path);
        self.run_flush(FlushInput::Changed(Vec::new()));
    }

    /// Tear the engine down: every registry is cleared and all pending work
    /// is absorbed. A disposed engine ignores further mutations.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        {
            let mut bindings = self.inner.bindings.write();
            for binding in bindings.iter() {
                binding.bump_epoch();
            }
            bindings.clear();
        }
        self.inner.fields.clear();
        self.inner.functions.clear_all();
        self.inner.schemas.clear();
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // ---- flush machinery ----

    fn form_state_snapshot(&self) -> FormStateSnapshot {
        let flags = *self.inner.flags.read();
        FormStateSnapshot {
            form_invalid: !self.inner.fields.all_valid(),
            form_submitting: flags.submitting,
            page_invalid: flags.page_invalid,
        }
    }

    fn run_flush(&self, input: FlushInput) {
        if self.is_disposed() {
            return;
        }
        let mut pending = match input {
            FlushInput::Everything => self.run_pass(PassFilter::All),
            FlushInput::Changed(changed) => changed,
        };

        for pass in 0.. {
            if pass >= MAX_PROPAGATION_PASSES {
                log::warn!("propagation did not settle after {MAX_PROPAGATION_PASSES} passes; check for cyclic derivations");
                break;
            }
            let mut progressed = false;
            if !pending.is_empty() {
                let changed = std::mem::take(&mut pending);
                pending.extend(self.run_pass(PassFilter::Changed(&changed)));
                progressed = true;
            }
            let current = self.form_state_snapshot();
            let state_changed = {
                let mut last = self.inner.last_form_state.write();
                if *last != current {
                    *last = current;
                    true
                } else {
                    false
                }
            };
            if state_changed {
                pending.extend(self.run_pass(PassFilter::FormState));
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Run one propagation pass, returning the paths newly changed by
    /// derivations. All bindings in the pass observe the same snapshot of the
    /// form tree; derivation writes become visible in the next pass.
    fn run_pass(&self, filter: PassFilter<'_>) -> Vec<String> {
        let bindings: Vec<Arc<LogicBinding>> = self.inner.bindings.read().clone();
        let affected: Vec<Arc<LogicBinding>> = bindings
            .into_iter()
            .filter(|binding| match filter {
                PassFilter::All => true,
                PassFilter::Changed(changed) => {
                    changed.iter().any(|path| binding.deps.matches(path))
                }
                PassFilter::FormState => binding.depends_on_form_state,
            })
            .collect();
        if affected.is_empty() {
            return Vec::new();
        }

        let form = self.inner.form.read().clone();
        let functions = self.inner.functions.custom_functions();
        let form_state = self.form_state_snapshot();

        let mut new_changes: Vec<String> = Vec::new();
        let mut revalidate: Vec<String> = Vec::new();

        for binding in &affected {
            match (&binding.action, binding.trigger) {
                (BindingAction::State { .. } | BindingAction::Derive { .. }, Trigger::Debounced) => {
                    self.schedule_debounced(binding.clone());
                }
                (BindingAction::State { kind, logic }, Trigger::OnChange) => {
                    let field_value = get_nested_value(&form, &binding.target)
                        .cloned()
                        .unwrap_or(Value::Null);
                    let scope = LogicScope {
                        ctx: EvaluationContext {
                            field_value: &field_value,
                            form_value: &form,
                            field_path: &binding.target,
                            custom_functions: &functions,
                            expressions: &self.inner.expressions,
                        },
                        form_state,
                    };
                    self.write_state(&binding.target, *kind, logic(&scope));
                }
                (BindingAction::Derive { derive }, Trigger::OnChange) => {
                    let field_value = get_nested_value(&form, &binding.target)
                        .cloned()
                        .unwrap_or(Value::Null);
                    let scope = LogicScope {
                        ctx: EvaluationContext {
                            field_value: &field_value,
                            form_value: &form,
                            field_path: &binding.target,
                            custom_functions: &functions,
                            expressions: &self.inner.expressions,
                        },
                        form_state,
                    };
                    if let Some(changed) = self.assign_derived(&binding.target, derive(&scope)) {
                        new_changes.push(changed);
                    }
                }
                (BindingAction::Validate { .. }, _) => {
                    if !revalidate.contains(&binding.target) {
                        revalidate.push(binding.target.clone());
                    }
                }
            }
        }

        for target in revalidate {
            self.revalidate_field(&target);
        }
        new_changes
    }

    fn write_state(&self, path: &str, kind: StateKind, value: bool) {
        let Some(node) = self.inner.fields.get(path) else {
            return;
        };
        node.with_state(|state| match kind {
            StateKind::Hidden => state.hidden = value,
            StateKind::Readonly => state.readonly = value,
            StateKind::Disabled => state.disabled = value,
            StateKind::Required => state.required = value,
        });
    }

    /// Write a derivation result, returning the path when the value changed
    fn assign_derived(&self, path: &str, computed: Option<Value>) -> Option<String> {
        let computed = computed?;
        let mut form = self.inner.form.write();
        let unchanged = get_nested_value(&form, path)
            .is_some_and(|current| current == &computed || strict_value_equals(current, &computed));
        if unchanged {
            return None;
        }
        if set_nested_value(&mut form, path, computed) {
            Some(path.to_string())
        } else {
            log::warn!("derivation cannot write to '{path}'");
            None
        }
    }

    /// Re-run every validator rule bound to one field, rebuilding its error
    /// map in rule order. Async rules keep their previous error while the new
    /// result is in flight and commit through a generation ticket.
    fn revalidate_field(&self, path: &str) {
        let Some(node) = self.inner.fields.get(path) else {
            return;
        };
        let generation = node.next_generation();

        let rules: Vec<Arc<LogicBinding>> = self
            .inner
            .bindings
            .read()
            .iter()
            .filter(|binding| {
                binding.target == path && matches!(binding.action, BindingAction::Validate { .. })
            })
            .cloned()
            .collect();

        let form = self.inner.form.read().clone();
        let functions = self.inner.functions.custom_functions();
        let form_state = self.form_state_snapshot();
        let field_value = get_nested_value(&form, path).cloned().unwrap_or(Value::Null);
        let previous = node.snapshot().errors;
        let has_runtime = tokio::runtime::Handle::try_current().is_ok();

        let mut errors = indexmap::IndexMap::new();
        type PendingValidation =
            futures::future::BoxFuture<'static, Result<Option<ValidationError>, AsyncValidationError>>;
        let mut to_spawn: Vec<(String, PendingValidation)> = Vec::new();

        for binding in &rules {
            let BindingAction::Validate { rule, active } = &binding.action else {
                continue;
            };
            let ctx = EvaluationContext {
                field_value: &field_value,
                form_value: &form,
                field_path: path,
                custom_functions: &functions,
                expressions: &self.inner.expressions,
            };
            let scope = RuleScope {
                ctx,
                registry: &self.inner.functions,
            };
            let logic_scope = LogicScope { ctx, form_state };
            let gated_on = active.as_ref().is_none_or(|gate| gate(&logic_scope));
            if !gated_on || !rule.is_active(&scope) {
                continue;
            }

            match &rule.rule {
                RuleKind::Sync(check) => {
                    if let Some(error) = check(&scope) {
                        errors.insert(rule.kind.clone(), error);
                    }
                }
                RuleKind::Async {
                    function_name,
                    params,
                } => {
                    let Some(validator) = self.inner.functions.async_validator(function_name)
                    else {
                        log::warn!("async validator '{function_name}' is not registered");
                        continue;
                    };
                    if !has_runtime {
                        log::warn!("async validation requires a tokio runtime; skipping");
                        continue;
                    }
                    // Keep the previous verdict visible while the new one is
                    // in flight
                    if let Some(existing) = previous.get(&rule.kind) {
                        errors.insert(rule.kind.clone(), existing.clone());
                    }
                    let request = ValidationRequest {
                        value: field_value.clone(),
                        form_value: form.clone(),
                        field_path: path.to_string(),
                        params: params.clone(),
                    };
                    to_spawn.push((rule.kind.clone(), validator(request)));
                }
                RuleKind::Http {
                    function_name,
                    params,
                } => {
                    let Some(resolver) = self.inner.functions.http_validator(function_name) else {
                        log::warn!("http validator '{function_name}' is not registered");
                        continue;
                    };
                    let Some(transport) = self.inner.transport.read().clone() else {
                        log::warn!(
                            "customHttp validator '{function_name}' skipped: no remote transport installed"
                        );
                        continue;
                    };
                    if !has_runtime {
                        log::warn!("async validation requires a tokio runtime; skipping");
                        continue;
                    }
                    let context = crate::validate::ValidationContext {
                        value: &field_value,
                        form_value: &form,
                        field_path: path,
                        params: params.as_ref(),
                    };
                    let descriptor = resolver(&context);
                    if let Some(existing) = previous.get(&rule.kind) {
                        errors.insert(rule.kind.clone(), existing.clone());
                    }
                    let future = async move { transport.validate(descriptor).await };
                    to_spawn.push((rule.kind.clone(), Box::pin(future)));
                }
            }
        }

        // Commit before spawning so a fast task cannot race the rebuild
        let pending = to_spawn.len();
        node.with_state(|state| {
            state.errors = errors;
            state.pending = pending;
        });
        for (kind, future) in to_spawn {
            self.spawn_async_result(node.clone(), kind, generation, future);
        }
    }

    /// Spawn an async validation, committing only if still the latest
    /// generation when it resolves
    fn spawn_async_result(
        &self,
        node: Arc<FieldNode>,
        kind: String,
        generation: u64,
        future: futures::future::BoxFuture<'static, Result<Option<ValidationError>, AsyncValidationError>>,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("async validation requires a tokio runtime; skipping");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            let result = future.await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disposed.load(Ordering::SeqCst) || node.is_destroyed() {
                return;
            }
            // Last-write-wins by generation, not completion order
            if node.current_generation() != generation {
                return;
            }
            node.with_state(|state| {
                state.pending = state.pending.saturating_sub(1);
                match result {
                    Ok(None) => {
                        state.errors.shift_remove(&kind);
                    }
                    Ok(Some(mut error)) => {
                        error.kind = kind.clone();
                        state.errors.insert(kind.clone(), error);
                    }
                    Err(failure) => {
                        state.errors.shift_remove(&kind);
                        state
                            .errors
                            .insert(ASYNC_FAILED_KIND.to_string(), failure.to_validation_error());
                    }
                }
            });
            FormEngine { inner }.run_flush(FlushInput::Changed(Vec::new()));
        });
    }

    /// Schedule a debounced binding: the pending timer is superseded if any
    /// newer dependency change schedules again before it fires
    fn schedule_debounced(&self, binding: Arc<LogicBinding>) {
        let epoch = binding.bump_epoch();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("debounced logic requires a tokio runtime; evaluating immediately");
            self.fire_debounced(&binding);
            return;
        };
        let delay = Duration::from_millis(binding.debounce_ms);
        let weak = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disposed.load(Ordering::SeqCst) {
                return;
            }
            if binding.epoch() != epoch {
                return;
            }
            match inner.fields.get(&binding.target) {
                Some(node) if !node.is_destroyed() => {}
                _ => return,
            }
            FormEngine { inner }.fire_debounced(&binding);
        });
    }

    fn fire_debounced(&self, binding: &Arc<LogicBinding>) {
        let form = self.inner.form.read().clone();
        let functions = self.inner.functions.custom_functions();
        let form_state = self.form_state_snapshot();
        let field_value = get_nested_value(&form, &binding.target)
            .cloned()
            .unwrap_or(Value::Null);
        let scope = LogicScope {
            ctx: EvaluationContext {
                field_value: &field_value,
                form_value: &form,
                field_path: &binding.target,
                custom_functions: &functions,
                expressions: &self.inner.expressions,
            },
            form_state,
        };
        match &binding.action {
            BindingAction::State { kind, logic } => {
                self.write_state(&binding.target, *kind, logic(&scope));
                self.run_flush(FlushInput::Changed(Vec::new()));
            }
            BindingAction::Derive { derive } => {
                if let Some(changed) = self.assign_derived(&binding.target, derive(&scope)) {
                    self.run_flush(FlushInput::Changed(vec![changed]));
                }
            }
            BindingAction::Validate { .. } => {
                self.revalidate_field(&binding.target);
                self.run_flush(FlushInput::Changed(Vec::new()));
            }
        }
    }
}

enum FlushInput {
    /// Run every binding once (mount, newly applied logic)
    Everything,
    /// Run bindings affected by these changed paths
    Changed(Vec<String>),
}

#[derive(Clone, Copy)]
enum PassFilter<'a> {
    All,
    Changed(&'a [String]),
    FormState,
}
