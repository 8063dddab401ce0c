//! Validation types and the validator factory
//!
//! Validator configuration compiles into rules attached to field nodes.
//! Sync rules evaluate inside the reactive flush; async and remote rules run
//! on the tokio runtime and commit through generation tickets so stale
//! results are discarded.

mod rules;

pub use rules::{CompiledValidator, RuleKind, RuleScope, ValidatorError, compile_validator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error kind used when an async or remote validator itself fails
pub const ASYNC_FAILED_KIND: &str = "asyncValidationFailed";

/// A structured validation error, keyed by `kind` in a field's error map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Error kind; one entry per kind survives on a field
    pub kind: String,
    /// Rendered, parameter-interpolated message
    pub message: String,
    /// Parameters the message was rendered from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ValidationError {
    /// Create an error with an already-rendered message
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            params: None,
        }
    }

    /// Attach the parameters the message was rendered from
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Borrowed inputs handed to synchronous custom validators
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Current value of the field under validation
    pub value: &'a Value,
    /// The whole form value tree
    pub form_value: &'a Value,
    /// Dot path of the field under validation
    pub field_path: &'a str,
    /// Opaque parameters from the validator configuration
    pub params: Option<&'a Value>,
}

/// Owned snapshot of validation inputs for async validators
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// Value of the field when validation was triggered
    pub value: Value,
    /// Form tree snapshot when validation was triggered
    pub form_value: Value,
    /// Dot path of the field under validation
    pub field_path: String,
    /// Opaque parameters from the validator configuration
    pub params: Option<Value>,
}

/// Failure of an async or remote validation attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsyncValidationError {
    /// The validator reported a failure (network, timeout, backend error)
    #[error("async validation failed: {message}")]
    Failed {
        /// Human-readable failure description
        message: String,
    },
}

impl AsyncValidationError {
    /// Create a failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// The validation error surfaced on the field for this failure
    pub fn to_validation_error(&self) -> ValidationError {
        ValidationError::new(ASYNC_FAILED_KIND, "Validation could not be completed")
    }
}

/// Descriptor for a remote validation call
///
/// The engine never performs network transport itself; a `customHttp`
/// validator resolves one of these and hands it to the installed
/// [`RemoteTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteValidation {
    /// Endpoint to call
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Request payload
    #[serde(default)]
    pub payload: Value,
}

/// Transport executing remote-validation descriptors
///
/// Installed on the engine by the consumer; without one, `customHttp`
/// validators log and skip.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Execute a descriptor, returning a validation error or `None` for valid
    async fn validate(
        &self,
        descriptor: RemoteValidation,
    ) -> Result<Option<ValidationError>, AsyncValidationError>;
}

/// Interpolate `{key}` placeholders from a JSON object of parameters.
///
/// Unknown placeholders are left intact.
pub fn interpolate_message(template: &str, params: Option<&Value>) -> String {
    let Some(Value::Object(map)) = params else {
        return template.to_string();
    };
    let mut message = template.to_string();
    for (key, value) in map {
        let placeholder = format!("{{{key}}}");
        if message.contains(&placeholder) {
            message = message.replace(&placeholder, &crate::model::to_display_string(value));
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn interpolates_known_placeholders_only() {
        assert_eq!(
            interpolate_message("at least {min}, {other}", Some(&json!({"min": 3}))),
            "at least 3, {other}"
        );
        assert_eq!(interpolate_message("plain", None), "plain");
    }

    #[test]
    fn async_failures_surface_as_a_distinct_kind() {
        let error = AsyncValidationError::failed("timeout").to_validation_error();
        assert_eq!(error.kind, ASYNC_FAILED_KIND);
    }
}
