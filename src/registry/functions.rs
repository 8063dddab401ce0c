//! Custom function and validator registry

use crate::condition::{CustomFunction, CustomFunctionMap, EvaluationContext};
use crate::validate::{
    AsyncValidationError, RemoteValidation, ValidationContext, ValidationError, ValidationRequest,
};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

/// Validator over a bare value plus optional configured params
pub type SimpleValidatorFn =
    Arc<dyn Fn(&Value, Option<&Value>) -> Option<ValidationError> + Send + Sync>;

/// Validator with access to the field's evaluation context
pub type ContextValidatorFn =
    Arc<dyn Fn(&ValidationContext<'_>) -> Option<ValidationError> + Send + Sync>;

/// Validator with access to the whole form tree through the context
pub type TreeValidatorFn =
    Arc<dyn Fn(&ValidationContext<'_>) -> Option<ValidationError> + Send + Sync>;

/// Asynchronous validator; receives an owned snapshot of its inputs
pub type AsyncValidatorFn = Arc<
    dyn Fn(ValidationRequest) -> BoxFuture<'static, Result<Option<ValidationError>, AsyncValidationError>>
        + Send
        + Sync,
>;

/// Resolver producing a remote-validation descriptor for a field snapshot
pub type HttpValidatorFn = Arc<dyn Fn(&ValidationContext<'_>) -> RemoteValidation + Send + Sync>;

/// A resolved custom validator, ordered by capability
///
/// When one name is registered in several namespaces, the most capable
/// registration wins: tree over context over simple.
#[derive(Clone)]
pub enum CustomValidator {
    /// Value-only validator
    Simple(SimpleValidatorFn),
    /// Context-aware validator
    Context(ContextValidatorFn),
    /// Tree-aware validator
    Tree(TreeValidatorFn),
}

/// Per-engine store of named custom functions and validators
///
/// Each namespace is independent, so one name may exist in several of them
/// without conflict. Registration overwrites by name; lookups never panic.
#[derive(Default)]
pub struct FunctionRegistry {
    custom_functions: RwLock<CustomFunctionMap>,
    simple_validators: RwLock<FxHashMap<String, SimpleValidatorFn>>,
    context_validators: RwLock<FxHashMap<String, ContextValidatorFn>>,
    tree_validators: RwLock<FxHashMap<String, TreeValidatorFn>>,
    async_validators: RwLock<FxHashMap<String, AsyncValidatorFn>>,
    http_validators: RwLock<FxHashMap<String, HttpValidatorFn>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom function callable from conditions and derivations
    pub fn register_custom_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&EvaluationContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.custom_functions
            .write()
            .insert(name.into(), Arc::new(function));
    }

    /// Snapshot of the custom function namespace.
    ///
    /// The returned map is a defensive copy; mutating it never affects the
    /// registry.
    pub fn custom_functions(&self) -> CustomFunctionMap {
        self.custom_functions.read().clone()
    }

    /// Look up one custom function
    pub fn custom_function(&self, name: &str) -> Option<CustomFunction> {
        self.custom_functions.read().get(name).cloned()
    }

    /// Drop every registered custom function
    pub fn clear_custom_functions(&self) {
        self.custom_functions.write().clear();
    }

    /// Register a value-only validator
    pub fn register_simple_validator<F>(&self, name: impl Into<String>, validator: F)
    where
        F: Fn(&Value, Option<&Value>) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.simple_validators
            .write()
            .insert(name.into(), Arc::new(validator));
    }

    /// Register a context-aware validator
    pub fn register_context_validator<F>(&self, name: impl Into<String>, validator: F)
    where
        F: Fn(&ValidationContext<'_>) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.context_validators
            .write()
            .insert(name.into(), Arc::new(validator));
    }

    /// Register a tree-aware validator
    pub fn register_tree_validator<F>(&self, name: impl Into<String>, validator: F)
    where
        F: Fn(&ValidationContext<'_>) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.tree_validators
            .write()
            .insert(name.into(), Arc::new(validator));
    }

    /// Register an asynchronous validator
    pub fn register_async_validator<F>(&self, name: impl Into<String>, validator: F)
    where
        F: Fn(ValidationRequest) -> BoxFuture<'static, Result<Option<ValidationError>, AsyncValidationError>>
            + Send
            + Sync
            + 'static,
    {
        self.async_validators
            .write()
            .insert(name.into(), Arc::new(validator));
    }

    /// Register a remote-validation descriptor resolver
    pub fn register_http_validator<F>(&self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&ValidationContext<'_>) -> RemoteValidation + Send + Sync + 'static,
    {
        self.http_validators
            .write()
            .insert(name.into(), Arc::new(resolver));
    }

    /// Resolve a synchronous custom validator by capability order
    pub fn resolve_custom_validator(&self, name: &str) -> Option<CustomValidator> {
        if let Some(tree) = self.tree_validators.read().get(name) {
            return Some(CustomValidator::Tree(tree.clone()));
        }
        if let Some(context) = self.context_validators.read().get(name) {
            return Some(CustomValidator::Context(context.clone()));
        }
        self.simple_validators
            .read()
            .get(name)
            .map(|simple| CustomValidator::Simple(simple.clone()))
    }

    /// Look up an asynchronous validator
    pub fn async_validator(&self, name: &str) -> Option<AsyncValidatorFn> {
        self.async_validators.read().get(name).cloned()
    }

    /// Look up a remote-validation resolver
    pub fn http_validator(&self, name: &str) -> Option<HttpValidatorFn> {
        self.http_validators.read().get(name).cloned()
    }

    /// Reset every namespace
    pub fn clear_all(&self) {
        self.custom_functions.write().clear();
        self.simple_validators.write().clear();
        self.context_validators.write().clear();
        self.tree_validators.write().clear();
        self.async_validators.write().clear();
        self.http_validators.write().clear();
    }
}
