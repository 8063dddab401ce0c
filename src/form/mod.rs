//! Field nodes and the field-context registry
//!
//! A field node is the binding target for logic and validators: a bundle of
//! reactive state (`hidden`, `readonly`, `disabled`, `required`, errors,
//! pending-async count) addressed by its dot path in the form tree. The
//! engine writes this state; renderers read snapshots of it.

use crate::validate::ValidationError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Mutable state of one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    /// Whether the field is hidden
    pub hidden: bool,
    /// Whether the field is read-only
    pub readonly: bool,
    /// Whether the field is disabled
    pub disabled: bool,
    /// Whether the field is required
    pub required: bool,
    /// Validation errors keyed by kind, in rule order
    pub errors: IndexMap<String, ValidationError>,
    /// Number of async validations currently in flight
    pub pending: usize,
}

impl FieldState {
    /// A field is valid when it has no errors; pending validations do not
    /// count as errors but are reported separately
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One addressable node in the form tree
pub struct FieldNode {
    path: String,
    state: RwLock<FieldState>,
    /// Validation generation; async results from an older generation are stale
    generation: AtomicU64,
    destroyed: AtomicBool,
}

impl FieldNode {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(FieldState::default()),
            generation: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Dot path of this field from the form root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> FieldState {
        self.state.read().clone()
    }

    /// Whether the field currently has no errors
    pub fn is_valid(&self) -> bool {
        self.state.read().is_valid()
    }

    /// Whether any async validation is in flight
    pub fn is_pending(&self) -> bool {
        self.state.read().pending > 0
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut FieldState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// Start a new validation generation, superseding in-flight async work
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        // Invalidate any ticket an in-flight task might still hold
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Registry of live field nodes, keyed by dot path
///
/// Owned by one engine; cleared on teardown so bindings never leak across
/// independently mounted forms.
#[derive(Default)]
pub struct FieldRegistry {
    fields: RwLock<FxHashMap<String, Arc<FieldNode>>>,
}

impl FieldRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node at a path
    pub fn register(&self, path: &str) -> Arc<FieldNode> {
        if let Some(existing) = self.fields.read().get(path) {
            return existing.clone();
        }
        let node = Arc::new(FieldNode::new(path));
        self.fields.write().insert(path.to_string(), node.clone());
        node
    }

    /// Look up the node at a path
    pub fn get(&self, path: &str) -> Option<Arc<FieldNode>> {
        self.fields.read().get(path).cloned()
    }

    /// Remove and mark destroyed the node at a path
    pub fn remove(&self, path: &str) -> Option<Arc<FieldNode>> {
        let removed = self.fields.write().remove(path);
        if let Some(node) = &removed {
            node.mark_destroyed();
        }
        removed
    }

    /// Paths of all live nodes
    pub fn paths(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    /// All live nodes
    pub fn nodes(&self) -> Vec<Arc<FieldNode>> {
        self.fields.read().values().cloned().collect()
    }

    /// Whether every live field is valid
    pub fn all_valid(&self) -> bool {
        self.fields.read().values().all(|node| node.is_valid())
    }

    /// Destroy every node and empty the registry
    pub fn clear(&self) {
        let mut fields = self.fields.write();
        for node in fields.values() {
            node.mark_destroyed();
        }
        fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_per_path() {
        let registry = FieldRegistry::new();
        let first = registry.register("user.name");
        let second = registry.register("user.name");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn removal_marks_the_node_destroyed() {
        let registry = FieldRegistry::new();
        let node = registry.register("a");
        let generation = node.current_generation();
        registry.remove("a");
        assert!(node.is_destroyed());
        assert!(node.current_generation() > generation);
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn validity_aggregates_over_all_fields() {
        let registry = FieldRegistry::new();
        let a = registry.register("a");
        registry.register("b");
        assert!(registry.all_valid());

        a.with_state(|state| {
            state.errors.insert(
                "required".to_string(),
                ValidationError::new("required", "This field is required"),
            );
        });
        assert!(!registry.all_valid());
    }

    #[test]
    fn generations_supersede_monotonically() {
        let node = FieldNode::new("x");
        let first = node.next_generation();
        let second = node.next_generation();
        assert!(second > first);
        assert_eq!(node.current_generation(), second);
    }
}
