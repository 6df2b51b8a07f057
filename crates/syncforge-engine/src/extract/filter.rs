//! Field-level filter predicates and their caller-facing JSON form.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use syncforge_types::{Row, SyncError, Value};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    /// SQL operator text. `In` is rendered by the caller.
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
        }
    }
}

/// `field op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate against an in-memory row. A missing field never matches.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual.loosely_equals(&self.value),
            FilterOp::Ne => !actual.loosely_equals(&self.value),
            FilterOp::In => match &self.value {
                Value::List(items) => items.iter().any(|v| actual.loosely_equals(v)),
                other => actual.loosely_equals(other),
            },
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Order two values: numerically when both are numeric, chronologically for
/// dates, textually otherwise. Nulls are unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        _ => {
            let numeric = |v: &Value| match v {
                Value::Int(_) | Value::Float(_) | Value::Decimal(_) => v.as_decimal(),
                _ => None,
            };
            match (numeric(a), numeric(b)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(a.to_string().cmp(&b.to_string())),
            }
        }
    }
}

/// The filter set for one extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Append every filter of `other`.
    #[must_use]
    pub fn merge(mut self, other: Query) -> Self {
        self.filters.extend(other.filters);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether `row` passes every filter.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Parse the caller JSON form:
    /// `{"status": "A", "price": {"gte": 10}, "code": {"in": ["X", "Y"]}}`.
    /// A scalar means equality; an object maps operators to operands.
    /// `null` yields an empty query.
    ///
    /// # Errors
    ///
    /// Returns a config error for non-object input, unknown operators, or an
    /// `in` operand that is not a list.
    pub fn from_json(blob: &serde_json::Value) -> Result<Self, SyncError> {
        let object = match blob {
            serde_json::Value::Null => return Ok(Self::new()),
            serde_json::Value::Object(object) => object,
            other => {
                return Err(SyncError::config(
                    "INVALID_FILTERS",
                    format!("filters must be a JSON object, got {other}"),
                ))
            }
        };

        let mut query = Self::new();
        for (field, spec) in object {
            match spec {
                serde_json::Value::Object(ops) if !ops.is_empty() => {
                    for (op_name, operand) in ops {
                        let op = FilterOp::parse(op_name).ok_or_else(|| {
                            SyncError::config(
                                "INVALID_FILTERS",
                                format!("unknown filter operator '{op_name}' on field '{field}'"),
                            )
                        })?;
                        if op == FilterOp::In && !operand.is_array() {
                            return Err(SyncError::config(
                                "INVALID_FILTERS",
                                format!("'in' filter on field '{field}' needs a list"),
                            ));
                        }
                        query.filters.push(Filter::new(field, op, Value::from_json(operand)));
                    }
                }
                scalar => query
                    .filters
                    .push(Filter::new(field, FilterOp::Eq, Value::from_json(scalar))),
            }
        }
        Ok(query)
    }

    /// Parse a JSON string in the form accepted by [`Query::from_json`].
    ///
    /// # Errors
    ///
    /// Returns a config error if the text is not valid JSON or not a valid
    /// filter object.
    pub fn from_json_str(text: &str) -> Result<Self, SyncError> {
        let blob: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            SyncError::config("INVALID_FILTERS", format!("filters are not valid JSON: {e}"))
        })?;
        Self::from_json(&blob)
    }
}
