//! Named schema-application registry

use crate::config::{SchemaApplicationConfig, SchemaRef};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Registry of named, reusable validator/logic bundles
///
/// Fields reference a bundle by string name (or inline it); registration
/// overwrites by name. Owned by one engine, cleared on teardown.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<FxHashMap<String, Arc<SchemaApplicationConfig>>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle under a name.
    ///
    /// The name argument wins over any `name` inside the bundle.
    pub fn register_schema(&self, name: impl Into<String>, schema: SchemaApplicationConfig) {
        self.schemas.write().insert(name.into(), Arc::new(schema));
    }

    /// Look up a bundle by name
    pub fn get_schema(&self, name: &str) -> Option<Arc<SchemaApplicationConfig>> {
        self.schemas.read().get(name).cloned()
    }

    /// Resolve a reference: names go through the registry, inline bundles are
    /// returned as-is. Unknown names resolve to `None`.
    pub fn resolve_schema(&self, reference: &SchemaRef) -> Option<Arc<SchemaApplicationConfig>> {
        match reference {
            SchemaRef::Name(name) => {
                let found = self.get_schema(name);
                if found.is_none() {
                    log::warn!("schema reference '{name}' is not registered");
                }
                found
            }
            SchemaRef::Inline(schema) => Some(Arc::new(schema.clone())),
        }
    }

    /// Drop every registered bundle
    pub fn clear(&self) {
        self.schemas.write().clear();
    }
}
