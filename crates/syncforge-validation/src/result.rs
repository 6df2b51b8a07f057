//! Validation result container.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use syncforge_types::{Row, Value};

/// Free-form bag passed into validators: the owning row's already-cleaned
/// fields plus anything earlier validators published.
pub type Context = Row;

/// Field key used for errors that belong to the row rather than one field.
pub const NON_FIELD: &str = "__row__";

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// One typed validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{field}: {message} ({severity})")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

/// Errors and warnings keyed by field, plus a context bag for cross-field
/// state. Validity is derived from the presence of errors only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: BTreeMap<String, Vec<String>>,
    pub warnings: BTreeMap<String, Vec<String>>,
    pub context: Context,
}

impl ValidationResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A result holding a single error.
    #[must_use]
    pub fn error(field: &str, message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.add_error(field, message);
        result
    }

    /// A result holding a single warning.
    #[must_use]
    pub fn warning(field: &str, message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.add_warning(field, message);
        result
    }

    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn add_warning(&mut self, field: &str, message: impl Into<String>) {
        self.warnings
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Fold another result into this one. Context entries from `other` win.
    pub fn merge(&mut self, other: ValidationResult) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
        for (field, messages) in other.warnings {
            self.warnings.entry(field).or_default().extend(messages);
        }
        self.context.extend(other.context);
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.values().all(Vec::is_empty)
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.warnings.values().any(|w| !w.is_empty())
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.values().map(Vec::len).sum()
    }

    /// Convert every warning into an error with the same message text.
    pub fn escalate_warnings(&mut self) {
        let warnings = std::mem::take(&mut self.warnings);
        for (field, messages) in warnings {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    /// Flatten into typed issues, errors first.
    #[must_use]
    pub fn issues(&self) -> Vec<ValidationError> {
        let errors = self.errors.iter().flat_map(|(field, messages)| {
            messages.iter().map(move |m| ValidationError {
                field: field.clone(),
                message: m.clone(),
                severity: Severity::Error,
            })
        });
        let warnings = self.warnings.iter().flat_map(|(field, messages)| {
            messages.iter().map(move |m| ValidationError {
                field: field.clone(),
                message: m.clone(),
                severity: Severity::Warning,
            })
        });
        errors.chain(warnings).collect()
    }

    /// `field: message` lines for every error, for run summaries.
    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .flat_map(|(field, messages)| messages.iter().map(move |m| format!("{field}: {m}")))
            .collect()
    }

    /// Publish a value for later validators in the same row.
    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_valid() {
        let result = ValidationResult::new();
        assert!(result.is_valid());
        assert!(!result.has_warnings());
    }

    #[test]
    fn warnings_do_not_invalidate() {
        let result = ValidationResult::warning("notes", "This field is recommended.");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn merge_combines_messages_per_field() {
        let mut a = ValidationResult::error("sku", "too long");
        let b = ValidationResult::error("sku", "bad pattern");
        a.merge(b);
        assert_eq!(a.errors["sku"], vec!["too long", "bad pattern"]);
        assert_eq!(a.error_count(), 2);
    }

    #[test]
    fn escalation_keeps_message_text() {
        let mut result = ValidationResult::warning("notes", "This field is recommended.");
        result.escalate_warnings();
        assert!(!result.is_valid());
        assert_eq!(result.errors["notes"], vec!["This field is recommended."]);
        assert!(!result.has_warnings());
    }

    #[test]
    fn issues_carry_severity() {
        let mut result = ValidationResult::error("a", "bad");
        result.add_warning("b", "meh");
        let issues = result.issues();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].severity, Severity::Warning);
        assert_eq!(issues[0].to_string(), "a: bad (error)");
    }

    #[test]
    fn context_merges_from_other() {
        let mut a = ValidationResult::new();
        let mut b = ValidationResult::new();
        b.set_context("parent_kind", Value::from("family"));
        a.merge(b);
        assert_eq!(a.context["parent_kind"], Value::from("family"));
    }
}
