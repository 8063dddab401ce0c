//! Parse-once cache for expression strings
//!
//! Conditions and derivations referencing the same expression source are
//! compiled a single time per engine; the cache is bounded and cleared
//! wholesale when it overflows.

use crate::ast::ExpressionNode;
use crate::parser::{ParseError, parse_expression};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

const MAX_CACHE_SIZE: usize = 1000;

/// Cache of compiled expressions keyed by source string
#[derive(Default)]
pub struct ExpressionCache {
    compiled: RwLock<FxHashMap<String, Arc<ExpressionNode>>>,
}

impl ExpressionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or compile an expression, using the cache when possible
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<ExpressionNode>, ParseError> {
        if let Some(found) = self.compiled.read().get(source) {
            return Ok(found.clone());
        }
        let ast = Arc::new(parse_expression(source)?);
        let mut compiled = self.compiled.write();
        if compiled.len() >= MAX_CACHE_SIZE {
            compiled.clear();
        }
        compiled.insert(source.to_string(), ast.clone());
        Ok(ast)
    }

    /// Number of cached expressions
    pub fn len(&self) -> usize {
        self.compiled.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.compiled.read().is_empty()
    }
}
