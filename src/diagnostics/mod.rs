//! Structured diagnostics for configuration validation

use std::fmt;

/// Diagnostic severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Subtle suggestion for improvement
    Hint,
    /// Helpful information
    Info,
    /// May indicate a problem but does not prevent the form from working
    Warning,
    /// Prevents the configuration from behaving as intended
    Error,
}

/// Diagnostic codes for configuration mistakes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// Key is not part of the configuration surface
    UnknownKey(String),
    /// Logic entry has an unrecognized `type`
    UnknownLogicType,
    /// Validator entry has an unrecognized `type`
    UnknownValidatorType,
    /// Custom validator without `functionName` or `expression`
    CustomValidatorIncomplete,
    /// Async/remote validator without `functionName`
    MissingFunctionName,
    /// Pattern validator whose pattern fails to compile
    InvalidPattern,
    /// Expression string that fails to parse
    InvalidExpression,
    /// Comparison condition with no operator; it will always evaluate false
    MissingOperator,
    /// Container field carrying a value-field-only key
    InvalidContainerKey(String),
    /// Array-only key on a non-array field, or vice versa
    InvalidArrayKey(String),
    /// Logic kind not permitted on this field kind
    LogicNotAllowed,
    /// Schema reference that no registered schema answers to
    UnknownSchema(String),
    /// Duplicate field id within one container scope
    DuplicateFieldId(String),
}

/// A configuration diagnostic annotated with the offending field's path
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDiagnostic {
    /// Severity of the diagnostic
    pub severity: Severity,
    /// Machine-readable code
    pub code: DiagnosticCode,
    /// Dot path of the field the diagnostic applies to; empty for form-level
    pub field_path: String,
    /// Human-readable message
    pub message: String,
    /// "Did you mean" style suggestion, when the mistake is a known anti-pattern
    pub suggestion: Option<String>,
}

impl ConfigDiagnostic {
    /// Create an error diagnostic
    pub fn error(code: DiagnosticCode, field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            field_path: field_path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a warning diagnostic
    pub fn warning(
        code: DiagnosticCode,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            field_path: field_path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Attach a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Hint => "hint",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        if self.field_path.is_empty() {
            write!(f, "{severity}: {}", self.message)?;
        } else {
            write!(f, "{severity} at '{}': {}", self.field_path, self.message)?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}
