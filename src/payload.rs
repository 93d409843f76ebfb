//! Tolerant decoder for inbound message payloads.
//!
//! Sensors publish either a JSON object carrying at least a numeric
//! `value` field, or a bare numeric literal as plain text. Binary payloads
//! are decoded as UTF-8 first. Anything else is a [`ParseError`] and the
//! message is dropped by the router.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ParsedReading;

// ---

/// Reasons a payload failed to decode into a reading.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    // ---
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("payload object has no usable `value` field")]
    MissingValue,
    #[error("payload `value` is not a finite number")]
    NonFiniteValue,
    #[error("unrecognized payload")]
    Unrecognized,
}

/// Decode a raw message body into a normalized reading.
///
/// 1. Bytes are decoded as UTF-8 text.
/// 2. A JSON object takes the structured path: `value` must coerce to a
///    finite float; optional metadata fields are passed through verbatim.
/// 3. Any other input is retried as a bare numeric literal.
///
/// An invalid `timestamp` string is treated as absent (the router falls
/// back to ingestion time), never as fatal.
pub fn parse(raw: &[u8]) -> Result<ParsedReading, ParseError> {
    // ---
    let text = std::str::from_utf8(raw).map_err(|_| ParseError::NotUtf8)?;

    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(text) {
        let value = match fields.get("value") {
            None | Some(Value::Null) => return Err(ParseError::MissingValue),
            Some(raw_value) => coerce_value(raw_value)?,
        };

        return Ok(ParsedReading {
            value,
            timestamp: fields.get("timestamp").and_then(parse_timestamp),
            serial_number: string_field(&fields, "serialNumber"),
            sensor_type: string_field(&fields, "type"),
            device_id: string_field(&fields, "deviceId"),
            farm_id: string_field(&fields, "farmId"),
        });
    }

    // Not a JSON object: accept the whole trimmed text as a numeric literal.
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(ParsedReading::bare(value)),
        _ => Err(ParseError::Unrecognized),
    }
}

/// Coerce a JSON `value` field to a finite float. Numbers are taken as-is;
/// numeric strings are accepted because some firmware quotes its values.
fn coerce_value(raw: &Value) -> Result<f64, ParseError> {
    // ---
    let value = match raw {
        Value::Number(n) => n.as_f64().ok_or(ParseError::NonFiniteValue)?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ParseError::MissingValue)?,
        _ => return Err(ParseError::MissingValue),
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseError::NonFiniteValue)
    }
}

fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    // ---
    raw.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn string_field(fields: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    // ---
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}
