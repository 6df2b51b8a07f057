//! Validators built from other validators or from arbitrary predicates.

use std::sync::Arc;

use syncforge_types::Value;

use crate::result::{Context, ValidationResult};
use crate::validators::Validator;

/// AND / OR composition of validators.
pub struct Compound {
    validators: Vec<Box<dyn Validator>>,
    require_all_valid: bool,
    message: String,
}

impl Compound {
    /// Every sub-validator must pass; all findings are merged.
    #[must_use]
    pub fn all(validators: Vec<Box<dyn Validator>>) -> Self {
        Self {
            validators,
            require_all_valid: true,
            message: "Value failed validation.".to_string(),
        }
    }

    /// At least one sub-validator must pass. On failure the compound's own
    /// message comes first, followed by every sub-error.
    #[must_use]
    pub fn any(validators: Vec<Box<dyn Validator>>, message: impl Into<String>) -> Self {
        Self {
            validators,
            require_all_valid: false,
            message: message.into(),
        }
    }
}

impl Validator for Compound {
    fn validate(&self, value: &Value, field: &str, ctx: &Context) -> ValidationResult {
        if self.require_all_valid {
            let mut merged = ValidationResult::new();
            for validator in &self.validators {
                merged.merge(validator.validate(value, field, ctx));
            }
            return merged;
        }

        let mut failures = ValidationResult::new();
        for validator in &self.validators {
            let result = validator.validate(value, field, ctx);
            if result.is_valid() {
                return result;
            }
            failures.merge(result);
        }

        let mut combined = ValidationResult::error(field, self.message.clone());
        combined.merge(failures);
        combined
    }
}

type Predicate = dyn Fn(&Value, &Context) -> bool + Send + Sync;

/// Wraps a domain predicate. The predicate sees the value and the row
/// context; a `false` return produces the configured message.
#[derive(Clone)]
pub struct BusinessRule {
    predicate: Arc<Predicate>,
    message: String,
}

impl BusinessRule {
    pub fn new(
        message: impl Into<String>,
        predicate: impl Fn(&Value, &Context) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(predicate),
            message: message.into(),
        }
    }
}

impl Validator for BusinessRule {
    fn validate(&self, value: &Value, field: &str, ctx: &Context) -> ValidationResult {
        if (self.predicate)(value, ctx) {
            ValidationResult::new()
        } else {
            ValidationResult::error(field, self.message.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::{PatternMatch, Required, StringLength};

    fn boxed(v: impl Validator + 'static) -> Box<dyn Validator> {
        Box::new(v)
    }

    #[test]
    fn all_merges_every_failure() {
        let compound = Compound::all(vec![
            boxed(PatternMatch::new("^[0-9]+$").unwrap()),
            boxed(StringLength::new(None, Some(2))),
        ]);
        let result = compound.validate(&Value::from("abc"), "code", &Context::new());
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn any_succeeds_when_one_passes() {
        let compound = Compound::any(
            vec![
                boxed(PatternMatch::new("^[0-9]+$").unwrap()),
                boxed(PatternMatch::new("^[a-z]+$").unwrap()),
            ],
            "Must be all digits or all letters.",
        );
        assert!(compound
            .validate(&Value::from("abc"), "code", &Context::new())
            .is_valid());
    }

    #[test]
    fn any_failure_leads_with_own_message() {
        let compound = Compound::any(
            vec![
                boxed(PatternMatch::new("^[0-9]+$").unwrap()),
                boxed(StringLength::new(None, Some(1))),
            ],
            "Must be numeric or a single character.",
        );
        let result = compound.validate(&Value::from("ab"), "code", &Context::new());
        let messages = &result.errors["code"];
        assert_eq!(messages[0], "Must be numeric or a single character.");
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn business_rule_reads_row_context() {
        let rule = BusinessRule::new("Child items need a parent.", |value, ctx| {
            !matches!(ctx.get("kind"), Some(Value::Text(k)) if k == "child") || !value.is_empty()
        });
        let mut ctx = Context::new();
        ctx.insert("kind".into(), Value::from("child"));
        assert!(!rule.validate(&Value::Null, "parent", &ctx).is_valid());
        assert!(rule.validate(&Value::from("P1"), "parent", &ctx).is_valid());
        ctx.insert("kind".into(), Value::from("family"));
        assert!(rule.validate(&Value::Null, "parent", &ctx).is_valid());
    }

    #[test]
    fn all_of_required_and_pattern() {
        let compound = Compound::all(vec![
            boxed(Required::new()),
            boxed(PatternMatch::new("^X").unwrap()),
        ]);
        let result = compound.validate(&Value::Null, "f", &Context::new());
        assert_eq!(result.error_count(), 1);
    }
}
