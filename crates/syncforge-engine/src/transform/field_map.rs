//! `field_map` transformer: declarative rename, coercion, lookup, and
//! validation driven entirely by the mapping's `transformer` block.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use syncforge_types::{Row, SyncError, Value};
use syncforge_validation::{
    Context, FieldFailure, RowValidator, RowValidatorBuilder, ValidationError, ValidationResult,
};

use super::coerce::{
    coerce, FieldType, Formats, DEFAULT_DATETIME_FORMAT, DEFAULT_DATE_FORMAT, DEFAULT_NULL_DATES,
};
use super::rules::{
    compile_cross_field, compile_rules, compile_skips, CrossFieldCheck, CrossFieldSpec, FieldCheck,
    RuleSpec, SkipCheck, SkipSpec,
};
use super::{Record, RecordStatus, Transformer};
use crate::config::types::MappingConfig;

/// Registry key.
pub const KIND: &str = "field_map";

/// Separator between composite key parts.
pub const KEY_SEPARATOR: &str = "|";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldMapOptions {
    /// Source field to target field, in output order.
    field_mappings: IndexMap<String, String>,
    /// Target field to type.
    #[serde(default)]
    types: BTreeMap<String, FieldType>,
    #[serde(default = "default_date_format")]
    date_format: String,
    #[serde(default = "default_datetime_format")]
    datetime_format: String,
    #[serde(default)]
    null_dates: Option<Vec<String>>,
    #[serde(default)]
    lookups: BTreeMap<String, LookupSpec>,
    #[serde(default)]
    validation_rules: Vec<RuleSpec>,
    #[serde(default)]
    cross_field: Vec<CrossFieldSpec>,
    #[serde(default)]
    skip_when: Vec<SkipSpec>,
    #[serde(default)]
    composite_key: Vec<String>,
    #[serde(default)]
    strict: bool,
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_datetime_format() -> String {
    DEFAULT_DATETIME_FORMAT.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LookupSpec {
    Detailed {
        values: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        default: Option<serde_json::Value>,
    },
    Plain(BTreeMap<String, serde_json::Value>),
}

/// Code translation table for one field.
#[derive(Debug, Clone)]
struct Lookup {
    values: BTreeMap<String, Value>,
    default: Option<Value>,
}

impl From<&LookupSpec> for Lookup {
    fn from(spec: &LookupSpec) -> Self {
        let (values, default) = match spec {
            LookupSpec::Detailed { values, default } => (values, default.as_ref()),
            LookupSpec::Plain(values) => (values, None),
        };
        Self {
            values: values
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
            default: default.map(Value::from_json),
        }
    }
}

impl Lookup {
    fn translate(&self, value: &Value, field: &str) -> Result<Value, String> {
        if value.is_empty() {
            return Ok(Value::Null);
        }
        self.values
            .get(&value.to_string())
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| format!("'{value}' has no entry in the lookup table for {field}."))
    }
}

pub struct FieldMapTransformer {
    field_mappings: IndexMap<String, String>,
    key_fields: Vec<String>,
    /// Coercion, lookups, checks, and skip rules.
    pipeline: RowValidator,
    /// Checks only, for re-validating transformed records.
    checks: RowValidator,
}

impl FieldMapTransformer {
    /// Build from a mapping. The natural key is `composite_key` when set,
    /// otherwise the loader's `unique_field`.
    ///
    /// # Errors
    ///
    /// Returns a config error for malformed options, invalid rules, or rules
    /// that reference fields absent from `field_mappings`.
    pub fn from_config(mapping: &MappingConfig) -> Result<Self, SyncError> {
        let invalid = |message: String| {
            SyncError::config(
                "INVALID_TRANSFORMER_CONFIG",
                format!("mapping '{}': {message}", mapping.entity_type),
            )
        };

        let options: FieldMapOptions =
            serde_json::from_value(serde_json::Value::Object(mapping.transformer.options.clone()))
                .map_err(|e| invalid(e.to_string()))?;
        if options.field_mappings.is_empty() {
            return Err(invalid("field_mappings must not be empty".to_string()));
        }

        let targets: Vec<&String> = options.field_mappings.values().collect();
        let is_target = |field: &str| targets.iter().any(|t| t.as_str() == field);

        let rules = compile_rules(&options.validation_rules).map_err(invalid)?;
        let cross_field = compile_cross_field(&options.cross_field).map_err(invalid)?;
        let skips = compile_skips(&options.skip_when).map_err(invalid)?;

        let referenced = rules
            .iter()
            .map(|(field, _)| field.as_str())
            .chain(options.types.keys().map(String::as_str))
            .chain(options.lookups.keys().map(String::as_str))
            .chain(options.composite_key.iter().map(String::as_str));
        for field in referenced {
            if !is_target(field) {
                return Err(invalid(format!(
                    "'{field}' is not a target field in field_mappings"
                )));
            }
        }

        let key_fields = if options.composite_key.is_empty() {
            mapping.loader.unique_field.iter().cloned().collect()
        } else {
            options.composite_key.clone()
        };

        let formats = Arc::new(Formats {
            date_format: options.date_format.clone(),
            datetime_format: options.datetime_format.clone(),
            null_dates: options.null_dates.clone().unwrap_or_else(|| {
                DEFAULT_NULL_DATES.iter().map(ToString::to_string).collect()
            }),
        });

        let pipeline = build_pipeline(&options, &rules, &cross_field, &skips, &formats);
        let checks = with_checks(RowValidator::builder(), &rules, &cross_field)
            .strict(options.strict)
            .build();

        Ok(Self {
            field_mappings: options.field_mappings,
            key_fields,
            pipeline,
            checks,
        })
    }

    /// Rename and project one source row onto the target fields.
    fn map_row(&self, raw: &Row) -> Row {
        self.field_mappings
            .iter()
            .map(|(source, target)| (target.clone(), raw.get(source).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    fn natural_key(&self, values: &Row) -> Option<String> {
        if self.key_fields.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(self.key_fields.len());
        for field in &self.key_fields {
            let value = values.get(field).filter(|v| !v.is_empty())?;
            parts.push(value.to_string());
        }
        Some(parts.join(KEY_SEPARATOR))
    }
}

fn build_pipeline(
    options: &FieldMapOptions,
    rules: &[FieldCheck],
    cross_field: &[CrossFieldCheck],
    skips: &[SkipCheck],
    formats: &Arc<Formats>,
) -> RowValidator {
    let mut builder = RowValidator::builder();

    for target in options.field_mappings.values() {
        if let Some(&ty) = options.types.get(target) {
            let formats = Arc::clone(formats);
            builder = builder.routine(target.clone(), move |value, _scope| {
                coerce(value, ty, &formats)
                    .map(|coerced| (coerced, ValidationResult::new()))
                    .map_err(FieldFailure::Error)
            });
        }
        if let Some(spec) = options.lookups.get(target) {
            let lookup = Lookup::from(spec);
            builder = builder.routine(target.clone(), move |value, scope| {
                lookup
                    .translate(value, scope.field)
                    .map(|translated| (translated, ValidationResult::new()))
                    .map_err(FieldFailure::Error)
            });
        }
    }

    if !skips.is_empty() {
        let skips = skips.to_vec();
        builder = builder.cross_field(move |row, _result| {
            skips
                .iter()
                .try_for_each(|skip| skip.check(row))
                .map_err(FieldFailure::Skip)
        });
    }

    with_checks(builder, rules, cross_field)
        .strict(options.strict)
        .build()
}

fn with_checks(
    mut builder: RowValidatorBuilder,
    rules: &[FieldCheck],
    cross_field: &[CrossFieldCheck],
) -> RowValidatorBuilder {
    for (field, validator) in rules {
        let validator = Arc::clone(validator);
        builder = builder.validator(
            field.clone(),
            move |value: &Value, field: &str, ctx: &Context| validator.validate(value, field, ctx),
        );
    }
    if !cross_field.is_empty() {
        let checks = cross_field.to_vec();
        builder = builder.cross_field(move |row, result| {
            for check in &checks {
                check.apply(row, result);
            }
            Ok(())
        });
    }
    builder
}

impl Transformer for FieldMapTransformer {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn transform(&self, rows: Vec<Row>, offset: usize) -> Result<Vec<Record>, SyncError> {
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let index = offset + i;
                let mapped = self.map_row(&raw);
                match self.pipeline.validate_row(&mapped, Some(index)) {
                    Err(skip) => Record {
                        index,
                        natural_key: self.natural_key(&mapped),
                        raw,
                        values: mapped,
                        status: RecordStatus::Skipped(skip.reason),
                        warnings: Vec::new(),
                    },
                    Ok(report) => {
                        let status = if report.is_valid() {
                            RecordStatus::Ok
                        } else {
                            RecordStatus::Failed(report.result.error_messages())
                        };
                        let warnings = report
                            .result
                            .warnings
                            .iter()
                            .flat_map(|(field, messages)| {
                                messages.iter().map(move |m| format!("{field}: {m}"))
                            })
                            .collect();
                        Record {
                            index,
                            natural_key: self.natural_key(&report.values),
                            raw,
                            values: report.values,
                            status,
                            warnings,
                        }
                    }
                }
            })
            .collect();
        Ok(records)
    }

    fn validate(&self, record: &Record) -> Vec<ValidationError> {
        self.checks
            .validate_row(&record.values, Some(record.index))
            .map(|report| report.result.issues())
            .unwrap_or_default()
    }
}
