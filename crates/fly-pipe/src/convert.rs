//! Value coercion to a named semantic type.
//!
//! Rules name a target type (`int`, `datetime`, `json`, ...) and an optional
//! format for both field values and literals. [`convert`] applies that pair.
//! Type names outside the known set pass values through unchanged, so a typo
//! in a rule silently disables conversion; the `unknown_value_type` lint in
//! [`crate::validation`] reports such names.

use std::fmt;

use chrono::format::{Parsed, StrftimeItems};
use chrono::{Duration, NaiveDateTime};
use fly_types::{FlyError, Result, Value};

/// Target type of a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    DateTime,
    Date,
    Time,
    TimeDelta,
    Json,
    /// Unrecognised type name; conversion is a no-op.
    Other(String),
}

impl ValueType {
    /// Look up a type by name. Never fails: unknown names map to [`ValueType::Other`].
    pub fn parse(name: &str) -> Self {
        match name {
            "bool" => ValueType::Bool,
            "int" => ValueType::Int,
            "float" => ValueType::Float,
            "str" => ValueType::Str,
            "datetime" => ValueType::DateTime,
            "date" => ValueType::Date,
            "time" => ValueType::Time,
            "timedelta" => ValueType::TimeDelta,
            "json" => ValueType::Json,
            other => ValueType::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::DateTime => "datetime",
            ValueType::Date => "date",
            ValueType::Time => "time",
            ValueType::TimeDelta => "timedelta",
            ValueType::Json => "json",
            ValueType::Other(name) => name,
        }
    }

    /// Primitive types ignore any format.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ValueType::Bool | ValueType::Int | ValueType::Float | ValueType::Str
        )
    }

    /// Format used when a rule names the type without one.
    pub fn default_format(&self) -> Option<&'static str> {
        match self {
            ValueType::DateTime => Some("%Y-%m-%d %H:%M"),
            ValueType::Date => Some("%Y-%m-%d"),
            ValueType::Time => Some("%H:%M:%S"),
            ValueType::TimeDelta => Some("seconds"),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Convert `value` to `value_type`, using `format` for temporal types.
///
/// With no type the value is returned unchanged.
pub fn convert(value: &Value, value_type: Option<&ValueType>, format: Option<&str>) -> Result<Value> {
    let Some(value_type) = value_type else {
        return Ok(value.clone());
    };

    match value_type {
        ValueType::Bool => Ok(Value::Bool(value.is_truthy())),
        ValueType::Int => to_int(value),
        ValueType::Float => to_float(value),
        ValueType::Str => Ok(Value::Str(value.to_string())),
        ValueType::DateTime | ValueType::Date | ValueType::Time => {
            let format = format.or(value_type.default_format()).unwrap_or_default();
            to_temporal(value, value_type, format)
        }
        ValueType::TimeDelta => {
            let unit = format.or(value_type.default_format()).unwrap_or_default();
            to_duration(value, unit)
        }
        ValueType::Json => decode_json(value),
        ValueType::Other(name) => {
            tracing::debug!(value_type = %name, "Unknown value type, value passed through unchanged");
            Ok(value.clone())
        }
    }
}

fn conversion_error(value: &Value, target: &str, message: impl Into<String>) -> FlyError {
    FlyError::Conversion {
        value: value.to_json().to_string(),
        target: target.to_string(),
        message: message.into(),
    }
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            let truncated = f.trunc();
            if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Ok(Value::Int(truncated as i64))
            } else {
                Err(conversion_error(value, "int", "float out of integer range"))
            }
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| conversion_error(value, "int", e.to_string())),
        other => Err(conversion_error(
            value,
            "int",
            format!("cannot build an int from {}", other.kind()),
        )),
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| conversion_error(value, "float", e.to_string())),
        other => Err(conversion_error(
            value,
            "float",
            format!("cannot build a float from {}", other.kind()),
        )),
    }
}

/// Parse `text` with a strftime-style `format` into a full timestamp.
///
/// Fields the format does not carry take strptime's defaults: year 1900,
/// January, day 1, and midnight. A format without time fields therefore
/// yields midnight, and one without date fields yields a time on 1900-01-01.
pub fn parse_timestamp(text: &str, format: &str) -> std::result::Result<NaiveDateTime, String> {
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, text, StrftimeItems::new(format)).map_err(|e| e.to_string())?;

    if parsed.timestamp().is_some() {
        return parsed.to_naive_datetime_with_offset(0).map_err(|e| e.to_string());
    }

    fill_defaults(&mut parsed).map_err(|e| e.to_string())?;
    let date = parsed.to_naive_date().map_err(|e| e.to_string())?;
    let time = parsed.to_naive_time().map_err(|e| e.to_string())?;
    Ok(date.and_time(time))
}

fn fill_defaults(parsed: &mut Parsed) -> chrono::format::ParseResult<()> {
    let has_year = parsed.year().is_some()
        || parsed.year_div_100().is_some()
        || parsed.year_mod_100().is_some()
        || parsed.isoyear().is_some();
    if !has_year {
        parsed.set_year(1900)?;
    }

    // Week and ordinal dates resolve the day on their own.
    let calendar_date = parsed.ordinal().is_none()
        && parsed.week_from_sun().is_none()
        && parsed.week_from_mon().is_none()
        && parsed.isoweek().is_none();
    if calendar_date {
        if parsed.month().is_none() {
            parsed.set_month(1)?;
        }
        if parsed.day().is_none() {
            parsed.set_day(1)?;
        }
    }

    match (parsed.hour_div_12(), parsed.hour_mod_12()) {
        (None, None) => parsed.set_hour(0)?,
        // `%I` without `%p` reads as AM.
        (None, Some(_)) => parsed.set_ampm(false)?,
        _ => {}
    }
    if parsed.minute().is_none() {
        parsed.set_minute(0)?;
    }
    Ok(())
}

fn to_temporal(value: &Value, value_type: &ValueType, format: &str) -> Result<Value> {
    let value = match value {
        Value::Str(text) => parse_timestamp(text, format)
            .map(Value::DateTime)
            .map_err(|e| conversion_error(value, value_type.name(), format!("{e} (format '{format}')")))?,
        other => other.clone(),
    };

    Ok(match (value_type, value) {
        (ValueType::Date, Value::DateTime(dt)) => Value::Date(dt.date()),
        (ValueType::Time, Value::DateTime(dt)) => Value::Time(dt.time()),
        (_, value) => value,
    })
}

fn to_duration(value: &Value, unit: &str) -> Result<Value> {
    let amount = match value {
        Value::Int(i) => *i,
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| conversion_error(value, "timedelta", e.to_string()))?,
        other => return Ok(other.clone()),
    };

    let duration = match unit {
        "weeks" => Duration::try_weeks(amount),
        "days" => Duration::try_days(amount),
        "hours" => Duration::try_hours(amount),
        "minutes" => Duration::try_minutes(amount),
        "seconds" => Duration::try_seconds(amount),
        "milliseconds" => Duration::try_milliseconds(amount),
        "microseconds" => Some(Duration::microseconds(amount)),
        other => {
            return Err(conversion_error(
                value,
                "timedelta",
                format!("unknown duration unit '{other}'"),
            ))
        }
    };
    duration
        .map(Value::Duration)
        .ok_or_else(|| conversion_error(value, "timedelta", "duration out of range"))
}

fn decode_json(value: &Value) -> Result<Value> {
    match value {
        Value::Str(text) => serde_json::from_str::<serde_json::Value>(text)
            .map(Value::from)
            .map_err(|e| conversion_error(value, "json", e.to_string())),
        other => Ok(other.clone()),
    }
}
