//! Value normalization between native store values and JSON-safe values.
//!
//! Outbound conversion is driven by the runtime value: dates and timestamps
//! become ISO-8601 strings, decimals become floating-point numbers. Inbound
//! conversion is driven by the attribute's declared [`FieldType`], so a `null`
//! or an unexpected shape passes through untouched and is left for the store
//! to validate.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde_json::{Number, Value as JsonValue};

use crate::envelope::JsonRecord;
use crate::error::{BridgeError, BridgeResult};
use crate::schema::{EntitySchema, FieldType};
use crate::types::{Record, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DATETIME_MICROS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Converts a native value to its JSON-safe form.
///
/// # Errors
///
/// Returns `BridgeError::SerializationFailure` for non-finite floats and
/// decimals that do not fit an `f64`.
pub fn outbound(value: &Value) -> BridgeResult<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => finite_number(*f)?,
        Value::Decimal(d) => finite_number(decimal_to_f64(d)?)?,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Date(d) => JsonValue::String(format_date(*d)),
        Value::DateTime(dt) => JsonValue::String(format_datetime(*dt)),
        Value::List(items) => {
            JsonValue::Array(items.iter().map(outbound).collect::<BridgeResult<_>>()?)
        }
        Value::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), outbound(item)?)))
                .collect::<BridgeResult<_>>()?,
        ),
    })
}

/// Converts every value of a native record.
///
/// # Errors
///
/// Propagates the first [`outbound`] failure.
pub fn outbound_record(record: &Record) -> BridgeResult<JsonRecord> {
    record
        .iter()
        .map(|(name, value)| Ok((name.clone(), outbound(value)?)))
        .collect()
}

fn finite_number(f: f64) -> BridgeResult<JsonValue> {
    Number::from_f64(f)
        .map(JsonValue::Number)
        .ok_or_else(|| BridgeError::serialization(format!("{f} has no JSON representation")))
}

/// Decimal to the nearest `f64`, going through the decimal's text so the
/// result is the float a reader of that text would pick.
fn decimal_to_f64(d: &Decimal) -> BridgeResult<f64> {
    d.to_string()
        .parse()
        .map_err(|_| BridgeError::serialization(format!("decimal {d} does not fit a float")))
}

/// ISO-8601 calendar date, e.g. `2024-03-01`.
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// ISO-8601 date-time. Microseconds are only written when non-zero.
#[must_use]
pub fn format_datetime(datetime: NaiveDateTime) -> String {
    let format = if datetime.nanosecond() / 1_000 == 0 {
        DATETIME_FORMAT
    } else {
        DATETIME_MICROS_FORMAT
    };
    datetime.format(format).to_string()
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Converts a JSON value destined for an attribute of type `field_type`.
///
/// Values whose shape does not match the declared type are converted
/// structurally and left for the store to reject.
#[must_use]
pub fn inbound(field_type: &FieldType, raw: JsonValue) -> Value {
    match (field_type, raw) {
        (_, JsonValue::Null) => Value::Null,
        (FieldType::Numeric, JsonValue::Number(n)) => match number_to_decimal(&n) {
            Some(d) => Value::Decimal(d),
            None => from_json(JsonValue::Number(n)),
        },
        (FieldType::Numeric, JsonValue::String(s)) => match Decimal::from_str(s.trim()) {
            Ok(d) => Value::Decimal(d),
            Err(_) => Value::String(s),
        },
        (FieldType::Float, JsonValue::Number(n)) => {
            n.as_f64().map_or_else(|| from_json(JsonValue::Number(n)), Value::Float)
        }
        (FieldType::Date, JsonValue::String(s)) => match parse_date(&s) {
            Some(d) => Value::Date(d),
            None => Value::String(s),
        },
        (FieldType::DateTime, JsonValue::String(s)) => match parse_datetime(&s) {
            Some(dt) => Value::DateTime(dt),
            None => Value::String(s),
        },
        (_, other) => from_json(other),
    }
}

/// Converts a whitelisted value map using the declared types of `schema`.
#[must_use]
pub fn inbound_values(schema: &EntitySchema, values: JsonRecord) -> Record {
    values
        .into_iter()
        .map(|(name, raw)| {
            let value = match schema.field_type(&name) {
                Some(field_type) => inbound(field_type, raw),
                None => from_json(raw),
            };
            (name, value)
        })
        .collect()
}

/// Structural conversion with no declared type to guide it.
#[must_use]
pub fn from_json(raw: JsonValue) -> Value {
    match raw {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        JsonValue::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Decimal from the shortest text of a JSON number, never from its binary value.
fn number_to_decimal(n: &Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Parses an ISO `YYYY-MM-DD` date.
#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// Parses an ISO date-time with a `T` or space separator and optional
/// fractional seconds. A bare date means midnight.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| parse_date(text).and_then(|d| d.and_hms_opt(0, 0, 0)))
}
