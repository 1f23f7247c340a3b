//! Value representations shared by every store adapter.
//!
//! Each driver converts its native cells into a [`UniversalValue`] before the
//! engine sees them. Comparisons always go through [`UniversalValue::equals`],
//! which normalizes both sides first, so an `INT4` from PostgreSQL and a
//! `Double` from MongoDB compare by numeric value rather than by type.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Strings longer than this many characters are shortened in previews.
pub const PREVIEW_LIMIT: usize = 25;

/// Number of characters kept when a preview is shortened.
pub const PREVIEW_KEEP: usize = 22;

/// A single row: column name to value.
pub type Row = HashMap<String, UniversalValue>;

/// Normalized cell value.
///
/// Every driver-sourced cell maps onto exactly one of these variants.
/// Structured values (documents, arrays, JSON columns) are carried as their
/// JSON text in [`UniversalValue::String`].
#[derive(Debug, Clone, PartialEq)]
pub enum UniversalValue {
    /// Null / missing value
    Null,

    /// Boolean value
    Bool(bool),

    /// Signed integer (all integer widths widen to 64 bits)
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// Text value
    String(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Point in time, normalized to UTC
    Timestamp(DateTime<Utc>),
}

/// The kind of a [`UniversalValue`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Timestamp,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two values whose kinds have no defined normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot compare {left} value with {right} value")]
pub struct ComparisonError {
    /// Kind of the left-hand value
    pub left: ValueKind,
    /// Kind of the right-hand value
    pub right: ValueKind,
}

impl UniversalValue {
    /// Get the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an i64. Integral floats convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => float_as_i64(*f),
            _ => None,
        }
    }

    /// Try to get this value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get this value as a timestamp.
    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// Compare two values after normalizing both sides.
    ///
    /// - null equals only null; null against anything else is unequal
    /// - integer and float compare numerically
    /// - string and bytes compare byte-wise
    /// - string and timestamp compare after parsing the string as RFC 3339
    ///
    /// Any other combination of kinds is a [`ComparisonError`].
    pub fn equals(&self, other: &UniversalValue) -> Result<bool, ComparisonError> {
        use UniversalValue::*;

        match (self, other) {
            (Null, Null) => Ok(true),
            (Null, _) | (_, Null) => Ok(false),
            (Bool(a), Bool(b)) => Ok(a == b),
            (Int(a), Int(b)) => Ok(a == b),
            (Float(a), Float(b)) => Ok(a == b),
            (Int(i), Float(f)) | (Float(f), Int(i)) => Ok(float_as_i64(*f) == Some(*i)),
            (String(a), String(b)) => Ok(a == b),
            (Bytes(a), Bytes(b)) => Ok(a == b),
            (String(s), Bytes(b)) | (Bytes(b), String(s)) => Ok(s.as_bytes() == b.as_slice()),
            (Timestamp(a), Timestamp(b)) => Ok(a == b),
            (Timestamp(ts), String(s)) | (String(s), Timestamp(ts)) => {
                match DateTime::parse_from_rfc3339(s) {
                    Ok(parsed) => Ok(parsed.with_timezone(&Utc) == *ts),
                    Err(_) => Err(self.incomparable(other)),
                }
            }
            _ => Err(self.incomparable(other)),
        }
    }

    fn incomparable(&self, other: &UniversalValue) -> ComparisonError {
        ComparisonError {
            left: self.kind(),
            right: other.kind(),
        }
    }

    /// Canonical text used to identify a record by its key value.
    ///
    /// Numerically equal integers and floats produce the same key, so a row
    /// keyed `1` and a row keyed `1.0` resolve to one record.
    pub fn key_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => match float_as_i64(*f) {
                Some(i) => i.to_string(),
                None => f.to_string(),
            },
            Self::String(s) => s.clone(),
            Self::Bytes(b) => base64::engine::general_purpose::STANDARD.encode(b),
            Self::Timestamp(ts) => ts.to_rfc3339(),
        }
    }

    /// Convert to a JSON value. Bytes become base64, timestamps RFC 3339.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }

    /// Convert from a JSON value. Arrays and objects keep their JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::String(other.to_string())
            }
        }
    }

    /// JSON rendering for human-readable reports.
    ///
    /// Strings and bytes longer than [`PREVIEW_LIMIT`] characters are cut to
    /// [`PREVIEW_KEEP`] characters followed by `...`. This only affects the
    /// rendering; comparisons and writes always use the full value.
    pub fn preview(&self) -> serde_json::Value {
        match self {
            Self::String(_) | Self::Bytes(_) => match self.to_json() {
                serde_json::Value::String(s) => serde_json::Value::String(truncate_preview(&s)),
                other => other,
            },
            _ => self.to_json(),
        }
    }
}

/// Shorten a preview string to [`PREVIEW_KEEP`] characters plus `...` when
/// it is longer than [`PREVIEW_LIMIT`] characters.
pub fn truncate_preview(s: &str) -> String {
    if s.chars().count() > PREVIEW_LIMIT {
        let mut short: String = s.chars().take(PREVIEW_KEEP).collect();
        short.push_str("...");
        short
    } else {
        s.to_string()
    }
}

fn float_as_i64(f: f64) -> Option<i64> {
    // i64::MAX is not representable as f64; 2^63 is the first float out of range.
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < UPPER {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for UniversalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for UniversalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UniversalValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(UniversalValue::from_json)
    }
}

impl From<bool> for UniversalValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for UniversalValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<i64> for UniversalValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for UniversalValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for UniversalValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for UniversalValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for UniversalValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<DateTime<Utc>> for UniversalValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<UniversalValue>> From<Option<T>> for UniversalValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}
