//! Registries owned by one form-engine instance
//!
//! Nothing here is process-wide: every registry is a constructible,
//! disposable object scoped to the engine that owns it, so independently
//! mounted forms can register same-named functions with different behavior.

mod functions;
mod schema;

pub use functions::{
    AsyncValidatorFn, ContextValidatorFn, CustomValidator, FunctionRegistry, HttpValidatorFn,
    SimpleValidatorFn, TreeValidatorFn,
};
pub use schema::SchemaRegistry;
