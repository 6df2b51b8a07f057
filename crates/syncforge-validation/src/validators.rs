//! Built-in single-value validators.
//!
//! Every validator except [`Required`] and [`Recommended`] passes silently
//! when the value is empty; emptiness is the concern of those two.

use bigdecimal::BigDecimal;
use regex::Regex;
use syncforge_types::Value;

use crate::result::{Context, ValidationResult};

/// A reusable check over one value.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value, field: &str, ctx: &Context) -> ValidationResult;
}

impl<F> Validator for F
where
    F: Fn(&Value, &str, &Context) -> ValidationResult + Send + Sync,
{
    fn validate(&self, value: &Value, field: &str, ctx: &Context) -> ValidationResult {
        self(value, field, ctx)
    }
}

fn message_or(custom: Option<&String>, default: impl FnOnce() -> String) -> String {
    custom.cloned().unwrap_or_else(default)
}

/// Fails when the value is empty.
#[derive(Debug, Clone, Default)]
pub struct Required {
    message: Option<String>,
}

impl Required {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Validator for Required {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            ValidationResult::error(
                field,
                message_or(self.message.as_ref(), || "This field is required.".to_string()),
            )
        } else {
            ValidationResult::new()
        }
    }
}

/// Warns, without invalidating, when the value is empty.
#[derive(Debug, Clone, Default)]
pub struct Recommended {
    message: Option<String>,
}

impl Recommended {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Validator for Recommended {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            ValidationResult::warning(
                field,
                message_or(self.message.as_ref(), || {
                    "This field is recommended but was not provided.".to_string()
                }),
            )
        } else {
            ValidationResult::new()
        }
    }
}

/// Text must match a regular expression.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    regex: Regex,
    message: Option<String>,
}

impl PatternMatch {
    /// # Errors
    ///
    /// Returns the regex compile error message when `pattern` is invalid.
    pub fn new(pattern: &str) -> Result<Self, String> {
        let regex =
            Regex::new(pattern).map_err(|e| format!("invalid regex pattern '{pattern}': {e}"))?;
        Ok(Self {
            regex,
            message: None,
        })
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Validator for PatternMatch {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::new();
        }
        let text = value.to_string();
        if self.regex.is_match(&text) {
            ValidationResult::new()
        } else {
            ValidationResult::error(
                field,
                message_or(self.message.as_ref(), || {
                    format!(
                        "Value '{text}' does not match pattern '{}'.",
                        self.regex.as_str()
                    )
                }),
            )
        }
    }
}

/// Numeric value must lie within inclusive bounds.
#[derive(Debug, Clone, Default)]
pub struct NumericRange {
    min: Option<BigDecimal>,
    max: Option<BigDecimal>,
    message: Option<String>,
}

impl NumericRange {
    #[must_use]
    pub fn new(min: Option<BigDecimal>, max: Option<BigDecimal>) -> Self {
        Self {
            min,
            max,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Validator for NumericRange {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::new();
        }
        let Some(number) = value.as_decimal() else {
            return ValidationResult::error(field, format!("Value '{value}' is not numeric."));
        };
        if let Some(min) = &self.min {
            if &number < min {
                return ValidationResult::error(
                    field,
                    message_or(self.message.as_ref(), || {
                        format!("Ensure this value is greater than or equal to {min}.")
                    }),
                );
            }
        }
        if let Some(max) = &self.max {
            if &number > max {
                return ValidationResult::error(
                    field,
                    message_or(self.message.as_ref(), || {
                        format!("Ensure this value is less than or equal to {max}.")
                    }),
                );
            }
        }
        ValidationResult::new()
    }
}

/// Character length bounds.
#[derive(Debug, Clone, Default)]
pub struct StringLength {
    min: Option<usize>,
    max: Option<usize>,
}

impl StringLength {
    #[must_use]
    pub fn new(min: Option<usize>, max: Option<usize>) -> Self {
        Self { min, max }
    }
}

impl Validator for StringLength {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::new();
        }
        let len = value.len();
        if let Some(min) = self.min {
            if len < min {
                return ValidationResult::error(
                    field,
                    format!("Ensure this value has at least {min} characters (it has {len})."),
                );
            }
        }
        if let Some(max) = self.max {
            if len > max {
                return ValidationResult::error(
                    field,
                    format!("Ensure this value has at most {max} characters (it has {len})."),
                );
            }
        }
        ValidationResult::new()
    }
}

/// Value must be one of an enumerated set.
#[derive(Debug, Clone)]
pub struct OneOf {
    choices: Vec<Value>,
}

impl OneOf {
    #[must_use]
    pub fn new(choices: Vec<Value>) -> Self {
        Self { choices }
    }
}

impl Validator for OneOf {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() || self.choices.iter().any(|c| c.loosely_equals(value)) {
            return ValidationResult::new();
        }
        let allowed = self
            .choices
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        ValidationResult::error(
            field,
            format!("Value '{value}' is not a valid choice (expected one of: {allowed})."),
        )
    }
}

/// Total digits and decimal places of a decimal value.
#[derive(Debug, Clone, Copy)]
pub struct DecimalPrecision {
    max_digits: Option<u32>,
    decimal_places: Option<u32>,
}

impl DecimalPrecision {
    #[must_use]
    pub fn new(max_digits: Option<u32>, decimal_places: Option<u32>) -> Self {
        Self {
            max_digits,
            decimal_places,
        }
    }
}

/// (total digits, digits after the point) as written, trailing zeros kept.
fn digit_counts(number: &BigDecimal) -> (u64, u64) {
    let (int, scale) = number.as_bigint_and_exponent();
    let magnitude = int.to_string().trim_start_matches('-').len() as u64;
    if scale >= 0 {
        #[allow(clippy::cast_sign_loss)]
        let decimals = scale as u64;
        (magnitude.max(decimals), decimals)
    } else {
        (magnitude + scale.unsigned_abs(), 0)
    }
}

impl Validator for DecimalPrecision {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::new();
        }
        let Some(number) = value.as_decimal() else {
            return ValidationResult::error(field, format!("Value '{value}' is not a decimal."));
        };
        let (digits, decimals) = digit_counts(&number);
        let whole = digits - decimals;
        let mut result = ValidationResult::new();
        if let Some(max) = self.max_digits {
            if digits > u64::from(max) {
                result.add_error(
                    field,
                    format!("Ensure that there are no more than {max} digits in total."),
                );
            }
        }
        if let Some(places) = self.decimal_places {
            if decimals > u64::from(places) {
                result.add_error(
                    field,
                    format!("Ensure that there are no more than {places} decimal places."),
                );
            }
        }
        if let (Some(max), Some(places)) = (self.max_digits, self.decimal_places) {
            let allowed_whole = u64::from(max.saturating_sub(places));
            if whole > allowed_whole && digits <= u64::from(max) {
                result.add_error(
                    field,
                    format!(
                        "Ensure that there are no more than {allowed_whole} digits before the decimal point."
                    ),
                );
            }
        }
        result
    }
}

/// Pattern-constrained identifier (codes, natural keys).
#[derive(Debug, Clone)]
pub struct Identifier {
    regex: Regex,
    max_length: Option<usize>,
}

impl Identifier {
    /// Default shape: letter or underscore, then letters, digits, underscores.
    pub const DEFAULT_PATTERN: &'static str = r"^[A-Za-z_][A-Za-z0-9_]*$";

    /// # Errors
    ///
    /// Returns the regex compile error message when `pattern` is invalid.
    pub fn new(pattern: Option<&str>, max_length: Option<usize>) -> Result<Self, String> {
        let pattern = pattern.unwrap_or(Self::DEFAULT_PATTERN);
        let regex = Regex::new(pattern)
            .map_err(|e| format!("invalid identifier pattern '{pattern}': {e}"))?;
        Ok(Self { regex, max_length })
    }
}

impl Validator for Identifier {
    fn validate(&self, value: &Value, field: &str, _ctx: &Context) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::new();
        }
        let text = value.to_string();
        if let Some(max) = self.max_length {
            let len = text.chars().count();
            if len > max {
                return ValidationResult::error(
                    field,
                    format!("Identifier '{text}' exceeds maximum length of {max} (got {len})."),
                );
            }
        }
        if self.regex.is_match(&text) {
            ValidationResult::new()
        } else {
            ValidationResult::error(field, format!("'{text}' is not a valid identifier."))
        }
    }
}
