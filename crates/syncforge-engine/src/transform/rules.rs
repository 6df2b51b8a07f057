//! Declarative validation rules for the `field_map` transformer.
//!
//! Each rule accepts a single item, a list, or (where it reads naturally) a
//! `field: argument` map:
//!
//! ```yaml
//! validation_rules:
//!   - required: [sku, name]
//!   - recommended: notes
//!   - regex: { sku: "^[A-Z0-9-]+$" }
//!   - range: { field: price, min: 0 }
//!   - choices: { status: [A, I] }
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Number;
use syncforge_types::{Row, Value};
use syncforge_validation::{
    DecimalPrecision, Identifier, NumericRange, OneOf, PatternMatch, Recommended, Required,
    SkipRow, StringLength, ValidationResult, Validator,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RuleSpec {
    Required { required: Selector<String> },
    Recommended { recommended: Selector<String> },
    Regex { regex: RegexSelector },
    Range { range: Selector<RangeRule> },
    Length { length: Selector<LengthRule> },
    Choices { choices: ChoicesSelector },
    Decimal { decimal: Selector<DecimalRule> },
    Identifier { identifier: Selector<IdentifierRule> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Selector<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Selector<T> {
    fn items(&self) -> Vec<&T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RegexSelector {
    One(RegexRule),
    Many(Vec<RegexRule>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegexRule {
    field: String,
    pattern: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RangeRule {
    field: String,
    #[serde(default)]
    min: Option<Number>,
    #[serde(default)]
    max: Option<Number>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LengthRule {
    field: String,
    #[serde(default)]
    min: Option<usize>,
    #[serde(default)]
    max: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ChoicesSelector {
    One(ChoicesRule),
    Many(Vec<ChoicesRule>),
    Map(BTreeMap<String, Vec<serde_json::Value>>),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChoicesRule {
    field: String,
    values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DecimalRule {
    field: String,
    #[serde(default)]
    max_digits: Option<u32>,
    #[serde(default)]
    decimal_places: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IdentifierRule {
    field: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    max_length: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum CrossFieldSpec {
    ForbidWhen { forbid_when: Condition },
    RequireWhen { require_when: Condition },
}

/// `field` is constrained when `when` equals `equals`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Condition {
    field: String,
    when: String,
    equals: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SkipSpec {
    field: String,
    #[serde(default)]
    equals: Option<serde_json::Value>,
    #[serde(default, rename = "in")]
    any_of: Vec<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// A validator attached to one target field.
pub(crate) type FieldCheck = (String, Arc<dyn Validator>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossFieldKind {
    Forbid,
    Require,
}

#[derive(Debug, Clone)]
pub(crate) struct CrossFieldCheck {
    kind: CrossFieldKind,
    field: String,
    when: String,
    equals: Value,
    message: String,
}

impl CrossFieldCheck {
    /// Record an error on `field` when the condition holds and the
    /// constraint is broken.
    pub(crate) fn apply(&self, row: &Row, result: &mut ValidationResult) {
        let triggered = row
            .get(&self.when)
            .is_some_and(|value| value.loosely_equals(&self.equals));
        if !triggered {
            return;
        }
        let empty = row.get(&self.field).map_or(true, Value::is_empty);
        let broken = match self.kind {
            CrossFieldKind::Forbid => !empty,
            CrossFieldKind::Require => empty,
        };
        if broken {
            result.add_error(&self.field, self.message.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SkipCheck {
    field: String,
    values: Vec<Value>,
    reason: Option<String>,
}

impl SkipCheck {
    pub(crate) fn check(&self, row: &Row) -> Result<(), SkipRow> {
        let Some(value) = row.get(&self.field) else {
            return Ok(());
        };
        if self.values.iter().any(|v| v.loosely_equals(value)) {
            let reason = self
                .reason
                .clone()
                .unwrap_or_else(|| format!("{} is '{value}'", self.field));
            return Err(SkipRow::new(reason));
        }
        Ok(())
    }
}

fn ensure_non_empty_field(field: &str) -> Result<(), String> {
    if field.trim().is_empty() {
        Err("field name must not be empty".to_string())
    } else {
        Ok(())
    }
}

fn bound(number: Option<&Number>, field: &str, name: &str) -> Result<Option<BigDecimal>, String> {
    number
        .map(|n| {
            BigDecimal::from_str(&n.to_string()).map_err(|e| {
                format!("range rule for field '{field}' has invalid {name} value '{n}': {e}")
            })
        })
        .transpose()
}

/// Compile `validation_rules` into per-field checks, in declaration order.
pub(crate) fn compile_rules(specs: &[RuleSpec]) -> Result<Vec<FieldCheck>, String> {
    let mut compiled: Vec<FieldCheck> = Vec::new();
    let mut push = |field: &str, validator: Arc<dyn Validator>| -> Result<(), String> {
        ensure_non_empty_field(field)?;
        compiled.push((field.to_string(), validator));
        Ok(())
    };

    for spec in specs {
        match spec {
            RuleSpec::Required { required } => {
                for field in required.items() {
                    push(field, Arc::new(Required::new()))?;
                }
            }
            RuleSpec::Recommended { recommended } => {
                for field in recommended.items() {
                    push(field, Arc::new(Recommended::new()))?;
                }
            }
            RuleSpec::Regex { regex } => {
                let rules: Vec<(&str, &str, Option<&String>)> = match regex {
                    RegexSelector::One(rule) => {
                        vec![(rule.field.as_str(), rule.pattern.as_str(), rule.message.as_ref())]
                    }
                    RegexSelector::Many(rules) => rules
                        .iter()
                        .map(|r| (r.field.as_str(), r.pattern.as_str(), r.message.as_ref()))
                        .collect(),
                    RegexSelector::Map(map) => map
                        .iter()
                        .map(|(f, p)| (f.as_str(), p.as_str(), None))
                        .collect(),
                };
                for (field, pattern, message) in rules {
                    if pattern.trim().is_empty() {
                        return Err(format!("regex pattern for field '{field}' must not be empty"));
                    }
                    let mut validator = PatternMatch::new(pattern)
                        .map_err(|e| format!("invalid regex pattern for field '{field}': {e}"))?;
                    if let Some(message) = message {
                        validator = validator.with_message(message.clone());
                    }
                    push(field, Arc::new(validator))?;
                }
            }
            RuleSpec::Range { range } => {
                for rule in range.items() {
                    let min = bound(rule.min.as_ref(), &rule.field, "min")?;
                    let max = bound(rule.max.as_ref(), &rule.field, "max")?;
                    match (&min, &max) {
                        (None, None) => {
                            return Err(format!(
                                "range rule for field '{}' must set min and/or max",
                                rule.field
                            ))
                        }
                        (Some(lo), Some(hi)) if lo > hi => {
                            return Err(format!(
                                "range rule for field '{}' has min > max ({lo} > {hi})",
                                rule.field
                            ))
                        }
                        _ => {}
                    }
                    let mut validator = NumericRange::new(min, max);
                    if let Some(message) = &rule.message {
                        validator = validator.with_message(message.clone());
                    }
                    push(&rule.field, Arc::new(validator))?;
                }
            }
            RuleSpec::Length { length } => {
                for rule in length.items() {
                    if let (Some(lo), Some(hi)) = (rule.min, rule.max) {
                        if lo > hi {
                            return Err(format!(
                                "length rule for field '{}' has min > max ({lo} > {hi})",
                                rule.field
                            ));
                        }
                    }
                    push(&rule.field, Arc::new(StringLength::new(rule.min, rule.max)))?;
                }
            }
            RuleSpec::Choices { choices } => {
                let rules: Vec<(&str, &[serde_json::Value])> = match choices {
                    ChoicesSelector::One(rule) => vec![(rule.field.as_str(), rule.values.as_slice())],
                    ChoicesSelector::Many(rules) => rules
                        .iter()
                        .map(|r| (r.field.as_str(), r.values.as_slice()))
                        .collect(),
                    ChoicesSelector::Map(map) => map
                        .iter()
                        .map(|(f, v)| (f.as_str(), v.as_slice()))
                        .collect(),
                };
                for (field, values) in rules {
                    if values.is_empty() {
                        return Err(format!("choices for field '{field}' must not be empty"));
                    }
                    let choices = values.iter().map(Value::from_json).collect();
                    push(field, Arc::new(OneOf::new(choices)))?;
                }
            }
            RuleSpec::Decimal { decimal } => {
                for rule in decimal.items() {
                    if let (Some(digits), Some(places)) = (rule.max_digits, rule.decimal_places) {
                        if places > digits {
                            return Err(format!(
                                "decimal rule for field '{}' has decimal_places > max_digits",
                                rule.field
                            ));
                        }
                    }
                    push(
                        &rule.field,
                        Arc::new(DecimalPrecision::new(rule.max_digits, rule.decimal_places)),
                    )?;
                }
            }
            RuleSpec::Identifier { identifier } => {
                for rule in identifier.items() {
                    let validator = Identifier::new(rule.pattern.as_deref(), rule.max_length)?;
                    push(&rule.field, Arc::new(validator))?;
                }
            }
        }
    }
    Ok(compiled)
}

pub(crate) fn compile_cross_field(specs: &[CrossFieldSpec]) -> Result<Vec<CrossFieldCheck>, String> {
    specs
        .iter()
        .map(|spec| {
            let (kind, condition) = match spec {
                CrossFieldSpec::ForbidWhen { forbid_when } => (CrossFieldKind::Forbid, forbid_when),
                CrossFieldSpec::RequireWhen { require_when } => {
                    (CrossFieldKind::Require, require_when)
                }
            };
            ensure_non_empty_field(&condition.field)?;
            ensure_non_empty_field(&condition.when)?;
            let equals = Value::from_json(&condition.equals);
            let message = condition.message.clone().unwrap_or_else(|| match kind {
                CrossFieldKind::Forbid => {
                    format!("Must be empty when {} is '{equals}'.", condition.when)
                }
                CrossFieldKind::Require => {
                    format!("This field is required when {} is '{equals}'.", condition.when)
                }
            });
            Ok(CrossFieldCheck {
                kind,
                field: condition.field.clone(),
                when: condition.when.clone(),
                equals,
                message,
            })
        })
        .collect()
}

pub(crate) fn compile_skips(specs: &[SkipSpec]) -> Result<Vec<SkipCheck>, String> {
    specs
        .iter()
        .map(|spec| {
            ensure_non_empty_field(&spec.field)?;
            let mut values: Vec<Value> = spec.any_of.iter().map(Value::from_json).collect();
            if let Some(equals) = &spec.equals {
                values.push(Value::from_json(equals));
            }
            if values.is_empty() {
                return Err(format!(
                    "skip_when rule for field '{}' needs `equals` or `in`",
                    spec.field
                ));
            }
            Ok(SkipCheck {
                field: spec.field.clone(),
                values,
                reason: spec.reason.clone(),
            })
        })
        .collect()
}
