//! Composable validators for single values and whole rows.
//!
//! Validators distinguish **errors** (the value is invalid) from
//! **warnings** (worth reporting, invalid only under strict mode). The
//! [`RowValidator`] dispatches through an explicit field registry, runs
//! cross-field hooks over the cleaned row, and propagates [`SkipRow`] so a
//! caller can drop a row without counting it as a failure.

pub mod compound;
pub mod result;
pub mod row;
pub mod validators;

pub use compound::{BusinessRule, Compound};
pub use result::{Context, Severity, ValidationError, ValidationResult, NON_FIELD};
pub use row::{FieldFailure, FieldScope, RowReport, RowValidator, RowValidatorBuilder, SkipRow};
pub use validators::{
    DecimalPrecision, Identifier, NumericRange, OneOf, PatternMatch, Recommended, Required,
    StringLength, Validator,
};
