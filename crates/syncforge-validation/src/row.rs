//! Row-level validation for imported records.
//!
//! A [`RowValidator`] owns an explicit registry from field name to an ordered
//! list of routines. Each routine receives the current value and returns the
//! (possibly transformed) value with its findings; the next routine sees the
//! transformed value. Unregistered fields pass through untouched. After every
//! field is processed, cross-field hooks run over the cleaned row.

use std::collections::HashMap;
use std::sync::Arc;

use syncforge_types::{Row, Value};

use crate::result::{Context, ValidationResult, NON_FIELD};
use crate::validators::Validator;

/// Signal that the current row must be dropped: not a success, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row skipped: {reason}")]
pub struct SkipRow {
    pub reason: String,
}

impl SkipRow {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// How a routine can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFailure {
    /// Abort the row; always propagates out of row validation.
    Skip(SkipRow),
    /// Unexpected failure; recorded as an error on the field, or under
    /// [`NON_FIELD`] when raised by a cross-field hook.
    Error(String),
    /// Failure attributed to a named field. Lets a cross-field hook point
    /// at the field it checked.
    Field { field: String, message: String },
}

impl FieldFailure {
    pub fn on_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<SkipRow> for FieldFailure {
    fn from(skip: SkipRow) -> Self {
        Self::Skip(skip)
    }
}

/// What a routine can see while validating one field.
pub struct FieldScope<'a> {
    pub field: &'a str,
    pub row_index: Option<usize>,
    /// The raw row as received.
    pub raw: &'a Row,
    /// Fields cleaned so far plus values published by earlier routines.
    pub context: &'a Context,
}

type FieldRoutine =
    Arc<dyn Fn(&Value, &FieldScope<'_>) -> Result<(Value, ValidationResult), FieldFailure> + Send + Sync>;

type RowHook = Arc<dyn Fn(&Row, &mut ValidationResult) -> Result<(), FieldFailure> + Send + Sync>;

/// Outcome of validating one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    pub row_index: Option<usize>,
    pub values: Row,
    pub result: ValidationResult,
}

impl RowReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }
}

/// Registry-driven row validator.
#[derive(Clone, Default)]
pub struct RowValidator {
    routines: HashMap<String, Vec<FieldRoutine>>,
    hooks: Vec<RowHook>,
    strict: bool,
}

impl RowValidator {
    #[must_use]
    pub fn builder() -> RowValidatorBuilder {
        RowValidatorBuilder::default()
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Fields with at least one registered routine.
    pub fn registered_fields(&self) -> impl Iterator<Item = &str> {
        self.routines.keys().map(String::as_str)
    }

    /// Validate one row.
    ///
    /// # Errors
    ///
    /// Returns [`SkipRow`] when any routine or hook asks to drop the row.
    /// Every other failure is captured in the report.
    pub fn validate_row(&self, row: &Row, row_index: Option<usize>) -> Result<RowReport, SkipRow> {
        let mut result = ValidationResult::new();
        let mut context = Context::new();
        let mut cleaned = Row::with_capacity(row.len());

        for (field, raw_value) in row {
            let value = match self.routines.get(field) {
                Some(routines) => {
                    let (value, field_result) =
                        Self::run_routines(routines, field, raw_value, row, row_index, &context)?;
                    context.extend(field_result.context.clone());
                    result.merge(field_result);
                    value
                }
                None => raw_value.clone(),
            };
            context.insert(field.clone(), value.clone());
            cleaned.insert(field.clone(), value);
        }

        for hook in &self.hooks {
            match hook(&cleaned, &mut result) {
                Ok(()) => {}
                Err(FieldFailure::Skip(skip)) => return Err(skip),
                Err(FieldFailure::Error(message)) => result.add_error(NON_FIELD, message),
                Err(FieldFailure::Field { field, message }) => result.add_error(&field, message),
            }
        }

        if self.strict {
            result.escalate_warnings();
        }

        Ok(RowReport {
            row_index,
            values: cleaned,
            result,
        })
    }

    fn run_routines(
        routines: &[FieldRoutine],
        field: &str,
        raw_value: &Value,
        raw: &Row,
        row_index: Option<usize>,
        context: &Context,
    ) -> Result<(Value, ValidationResult), SkipRow> {
        let scope = FieldScope {
            field,
            row_index,
            raw,
            context,
        };
        let mut value = raw_value.clone();
        let mut merged = ValidationResult::new();
        for routine in routines {
            match routine(&value, &scope) {
                Ok((next, routine_result)) => {
                    value = next;
                    merged.merge(routine_result);
                }
                Err(FieldFailure::Skip(skip)) => return Err(skip),
                Err(FieldFailure::Error(message)) => {
                    merged.add_error(field, message);
                    break;
                }
                Err(FieldFailure::Field { field: named, message }) => {
                    merged.add_error(&named, message);
                    break;
                }
            }
        }
        Ok((value, merged))
    }
}

/// Builder populating the field registry at construction time.
#[derive(Default)]
pub struct RowValidatorBuilder {
    inner: RowValidator,
}

impl RowValidatorBuilder {
    /// Append a transforming routine for `field`.
    #[must_use]
    pub fn routine(
        mut self,
        field: impl Into<String>,
        routine: impl Fn(&Value, &FieldScope<'_>) -> Result<(Value, ValidationResult), FieldFailure>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.inner
            .routines
            .entry(field.into())
            .or_default()
            .push(Arc::new(routine));
        self
    }

    /// Append a plain validator for `field`; the value passes through unchanged.
    #[must_use]
    pub fn validator(self, field: impl Into<String>, validator: impl Validator + 'static) -> Self {
        self.routine(field, move |value, scope| {
            Ok((
                value.clone(),
                validator.validate(value, scope.field, scope.context),
            ))
        })
    }

    /// Add a cross-field hook run over the cleaned row.
    #[must_use]
    pub fn cross_field(
        mut self,
        hook: impl Fn(&Row, &mut ValidationResult) -> Result<(), FieldFailure> + Send + Sync + 'static,
    ) -> Self {
        self.inner.hooks.push(Arc::new(hook));
        self
    }

    /// Escalate warnings to errors.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.inner.strict = strict;
        self
    }

    #[must_use]
    pub fn build(self) -> RowValidator {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::{Recommended, Required};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn uppercase(value: &Value, _scope: &FieldScope<'_>) -> Result<(Value, ValidationResult), FieldFailure> {
        Ok((
            Value::Text(value.to_string().to_uppercase()),
            ValidationResult::new(),
        ))
    }

    #[test]
    fn unregistered_fields_pass_through() {
        let validator = RowValidator::builder().routine("code", uppercase).build();
        let report = validator
            .validate_row(&row(&[("code", "ab".into()), ("other", Value::Int(3))]), Some(0))
            .unwrap();
        assert_eq!(report.values["code"], Value::from("AB"));
        assert_eq!(report.values["other"], Value::Int(3));
        assert!(report.is_valid());
    }

    #[test]
    fn routines_chain_transformed_values() {
        let validator = RowValidator::builder()
            .routine("code", uppercase)
            .validator("code", |value: &Value, field: &str, _ctx: &Context| {
                if value == &Value::from("AB") {
                    ValidationResult::new()
                } else {
                    ValidationResult::error(field, "expected uppercase")
                }
            })
            .build();
        let report = validator.validate_row(&row(&[("code", "ab".into())]), None).unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn routine_error_becomes_field_error() {
        let validator = RowValidator::builder()
            .routine("price", |_value, _scope| Err(FieldFailure::Error("cannot parse 'x'".into())))
            .validator("name", Required::new())
            .build();
        let report = validator
            .validate_row(&row(&[("price", "x".into()), ("name", "Widget".into())]), Some(1))
            .unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.result.errors["price"], vec!["cannot parse 'x'"]);
        assert!(!report.result.errors.contains_key("name"));
    }

    #[test]
    fn skip_propagates_from_routine() {
        let validator = RowValidator::builder()
            .routine("status", |value, _scope| {
                if value == &Value::from("D") {
                    Err(SkipRow::new("deleted in source").into())
                } else {
                    Ok((value.clone(), ValidationResult::new()))
                }
            })
            .build();
        let err = validator
            .validate_row(&row(&[("status", "D".into())]), Some(4))
            .unwrap_err();
        assert_eq!(err.reason, "deleted in source");
    }

    #[test]
    fn skip_propagates_from_hook() {
        let validator = RowValidator::builder()
            .cross_field(|_row, _result| Err(FieldFailure::Skip(SkipRow::new("dup"))))
            .build();
        assert!(validator.validate_row(&row(&[]), None).is_err());
    }

    #[test]
    fn cross_field_hook_overrides_valid_fields() {
        let validator = RowValidator::builder()
            .validator("parent", Required::new())
            .cross_field(|row, result| {
                let is_family = matches!(row.get("is_family"), Some(Value::Bool(true)));
                if is_family && row.get("size").is_some_and(|v| !v.is_empty()) {
                    result.add_error("size", "A family must not carry a size.");
                }
                Ok(())
            })
            .build();
        let report = validator
            .validate_row(
                &row(&[
                    ("parent", "P".into()),
                    ("is_family", Value::Bool(true)),
                    ("size", "XL".into()),
                ]),
                Some(0),
            )
            .unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.result.errors["size"], vec!["A family must not carry a size."]);
    }

    #[test]
    fn hook_errors_land_on_named_field_or_non_field() {
        let validator = RowValidator::builder()
            .cross_field(|row, _result| match (row.get("min_qty"), row.get("max_qty")) {
                (Some(Value::Int(min)), Some(Value::Int(max))) if min > max => {
                    Err(FieldFailure::on_field("max_qty", "must not be below min_qty"))
                }
                _ => Ok(()),
            })
            .cross_field(|_row, _result| Err(FieldFailure::Error("lookup unavailable".into())))
            .build();
        let report = validator
            .validate_row(&row(&[("min_qty", Value::Int(5)), ("max_qty", Value::Int(2))]), Some(0))
            .unwrap();
        assert_eq!(report.result.errors["max_qty"], vec!["must not be below min_qty"]);
        assert_eq!(report.result.errors[NON_FIELD], vec!["lookup unavailable"]);
    }

    #[test]
    fn strict_mode_escalates_warnings() {
        let lenient = RowValidator::builder()
            .validator("notes", Recommended::new())
            .build();
        let strict = RowValidator::builder()
            .validator("notes", Recommended::new())
            .strict(true)
            .build();
        let input = row(&[("notes", Value::Null)]);

        let report = lenient.validate_row(&input, None).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.result.warning_count(), 1);

        let report = strict.validate_row(&input, None).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.result.error_count(), 1);
        assert_eq!(
            report.result.errors["notes"][0],
            "This field is recommended but was not provided."
        );
    }

    #[test]
    fn later_routines_see_earlier_context() {
        let validator = RowValidator::builder()
            .routine("a", |value, _scope| {
                let mut result = ValidationResult::new();
                result.set_context("a_seen", Value::Bool(true));
                Ok((value.clone(), result))
            })
            .routine("b", |value, scope| {
                let mut result = ValidationResult::new();
                if scope.context.get("a_seen") != Some(&Value::Bool(true)) {
                    result.add_error(scope.field, "a not validated first");
                }
                if scope.context.get("a") != Some(&Value::Int(1)) {
                    result.add_error(scope.field, "sibling value missing");
                }
                Ok((value.clone(), result))
            })
            .build();
        let report = validator
            .validate_row(&row(&[("a", Value::Int(1)), ("b", Value::Int(2))]), None)
            .unwrap();
        assert!(report.is_valid(), "{:?}", report.result.errors);
    }
}
