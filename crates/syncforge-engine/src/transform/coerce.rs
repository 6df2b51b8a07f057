//! Per-field type coercion for loosely typed legacy values.

use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use syncforge_types::Value;

/// Target type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Int,
    Decimal,
    Float,
    Flag,
    Date,
    Datetime,
    Json,
}

/// Formats and sentinels shared by every date-like field of a mapping.
#[derive(Debug, Clone)]
pub(crate) struct Formats {
    pub date_format: String,
    pub datetime_format: String,
    pub null_dates: Vec<String>,
}

pub(crate) const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub(crate) const DEFAULT_NULL_DATES: [&str; 4] =
    ["0000-00-00", "00000000", "0", "0000-00-00 00:00:00"];

impl Default for Formats {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            null_dates: DEFAULT_NULL_DATES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Formats {
    fn is_null_date(&self, text: &str) -> bool {
        self.null_dates.iter().any(|s| s == text)
    }
}

/// Coerce `value` to `ty`. Empty input always becomes `Null`; required-ness
/// is a validator concern.
pub(crate) fn coerce(value: &Value, ty: FieldType, formats: &Formats) -> Result<Value, String> {
    if value.is_empty() {
        return Ok(Value::Null);
    }
    match ty {
        FieldType::Text => Ok(match value {
            Value::Text(s) => Value::Text(s.trim().to_string()),
            other => Value::Text(other.to_string()),
        }),
        FieldType::Int => to_int(value),
        FieldType::Decimal => value
            .as_decimal()
            .map(Value::Decimal)
            .ok_or_else(|| format!("'{value}' is not a valid decimal number.")),
        FieldType::Float => to_float(value),
        FieldType::Flag => to_flag(value),
        FieldType::Date => to_date(value, formats),
        FieldType::Datetime => to_datetime(value, formats),
        FieldType::Json => Ok(match value {
            Value::Text(s) => Value::Json(
                serde_json::from_str(s).map_err(|e| format!("'{s}' is not valid JSON: {e}"))?,
            ),
            other => Value::Json(other.to_json()),
        }),
    }
}

fn to_int(value: &Value) -> Result<Value, String> {
    let invalid = || format!("'{value}' is not a whole number.");
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Text(s) => s.trim().parse::<i64>().map(Value::Int).or_else(|_| {
            // "12.0" from a numeric text column
            BigDecimal::from_str(s.trim())
                .ok()
                .filter(BigDecimal::is_integer)
                .and_then(|d| d.to_i64())
                .map(Value::Int)
                .ok_or_else(invalid)
        }),
        Value::Float(_) | Value::Decimal(_) => value
            .as_decimal()
            .filter(BigDecimal::is_integer)
            .and_then(|d| d.to_i64())
            .map(Value::Int)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn to_float(value: &Value) -> Result<Value, String> {
    let invalid = || format!("'{value}' is not a valid number.");
    match value {
        Value::Float(f) => Ok(Value::Float(*f)),
        #[allow(clippy::cast_precision_loss)]
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Decimal(d) => d.to_f64().map(Value::Float).ok_or_else(invalid),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn to_flag(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "y" | "yes" | "t" | "true" => Ok(Value::Bool(true)),
            "0" | "n" | "no" | "f" | "false" => Ok(Value::Bool(false)),
            _ => Err(format!("'{s}' is not a valid flag (expected 0/1, Y/N, true/false).")),
        },
        other => Err(format!("'{other}' is not a valid flag (expected 0/1, Y/N, true/false).")),
    }
}

fn to_date(value: &Value, formats: &Formats) -> Result<Value, String> {
    let text = match value {
        Value::Date(d) => return Ok(Value::Date(*d)),
        Value::DateTime(dt) => return Ok(Value::Date(dt.date_naive())),
        Value::Text(s) => s.trim().to_string(),
        Value::Int(i) => i.to_string(),
        other => return Err(format!("'{other}' is not a valid date.")),
    };
    if formats.is_null_date(&text) {
        return Ok(Value::Null);
    }
    NaiveDate::parse_from_str(&text, &formats.date_format)
        .or_else(|_| NaiveDate::parse_from_str(&text, "%Y%m%d"))
        .map(Value::Date)
        .map_err(|_| {
            format!(
                "'{text}' is not a valid date (expected format {}).",
                formats.date_format
            )
        })
}

fn to_datetime(value: &Value, formats: &Formats) -> Result<Value, String> {
    let text = match value {
        Value::DateTime(dt) => return Ok(Value::DateTime(*dt)),
        Value::Date(d) => {
            return Ok(d
                .and_hms_opt(0, 0, 0)
                .map_or(Value::Null, |naive| Value::DateTime(naive.and_utc())))
        }
        Value::Text(s) => s.trim().to_string(),
        other => return Err(format!("'{other}' is not a valid datetime.")),
    };
    if formats.is_null_date(&text) {
        return Ok(Value::Null);
    }
    NaiveDateTime::parse_from_str(&text, &formats.datetime_format)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(&text).map(|dt| dt.with_timezone(&Utc)))
        .map(Value::DateTime)
        .map_err(|_| {
            format!(
                "'{text}' is not a valid datetime (expected format {}).",
                formats.datetime_format
            )
        })
}
