//! Values and rows.
//!
//! A `Row` is an ordered list of `Value`s paired with the `Schema` that
//! describes them. Schemas are shared by reference; rows of one step copy
//! all point at the same `Arc<Schema>` once the output layout is derived.

use crate::pipeline::error::ValueError;
use crate::pipeline::schema::Schema;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    /// 64-bit float.
    Number,
    Integer,
    /// Arbitrary-precision decimal kept in its textual form.
    BigNumber,
    /// UTC timestamp.
    Date,
    Boolean,
    Binary,
}

impl ValueType {
    pub fn display_name(&self) -> &'static str {
        match self {
            ValueType::String => "String",
            ValueType::Number => "Number",
            ValueType::Integer => "Integer",
            ValueType::BigNumber => "BigNumber",
            ValueType::Date => "Date",
            ValueType::Boolean => "Boolean",
            ValueType::Binary => "Binary",
        }
    }

    pub fn all() -> &'static [ValueType] {
        &[
            ValueType::String,
            ValueType::Number,
            ValueType::Integer,
            ValueType::BigNumber,
            ValueType::Date,
            ValueType::Boolean,
            ValueType::Binary,
        ]
    }

    /// Parse a type name as written in topology files (`"integer"`, `"big_number"`, ...).
    pub fn from_name(name: &str) -> Option<ValueType> {
        match name.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "string" | "str" => Some(ValueType::String),
            "number" | "float" => Some(ValueType::Number),
            "integer" | "int" => Some(ValueType::Integer),
            "big_number" | "bignumber" | "decimal" => Some(ValueType::BigNumber),
            "date" | "timestamp" => Some(ValueType::Date),
            "boolean" | "bool" => Some(ValueType::Boolean),
            "binary" => Some(ValueType::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Number(f64),
    Integer(i64),
    BigNumber(String),
    Date(DateTime<Utc>),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl Value {
    /// Type of a non-null value.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(ValueType::String),
            Value::Number(_) => Some(ValueType::Number),
            Value::Integer(_) => Some(ValueType::Integer),
            Value::BigNumber(_) => Some(ValueType::BigNumber),
            Value::Date(_) => Some(ValueType::Date),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Binary(_) => Some(ValueType::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::BigNumber(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Number(v) if v.is_finite() => Some(v.round() as i64),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::String(s) | Value::BigNumber(s) => s.trim().parse().ok(),
            Value::Date(d) => Some(d.timestamp_millis()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) | Value::BigNumber(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(v) => Some(*v != 0),
            Value::Number(v) => Some(*v != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => Some(true),
                "n" | "no" | "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parse text into a value of the given type. Empty text is `Null`.
    pub fn parse(text: &str, target: ValueType) -> Result<Value, ValueError> {
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Value::String(text.to_string()).convert(target)
    }

    /// Convert to another storage type. `Null` converts to `Null`.
    pub fn convert(self, target: ValueType) -> Result<Value, ValueError> {
        if self.value_type() == Some(target) || self.is_null() {
            return Ok(self);
        }
        let fail = |value: &Value| ValueError {
            value: value.to_string(),
            target,
        };
        let converted = match target {
            ValueType::String => Some(Value::String(self.to_string())),
            ValueType::Integer => self.as_i64().map(Value::Integer),
            ValueType::Number => self.as_f64().map(Value::Number),
            ValueType::BigNumber => match &self {
                Value::Integer(_) | Value::Number(_) => Some(Value::BigNumber(self.to_string())),
                Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                    Some(Value::BigNumber(s.trim().to_string()))
                }
                _ => None,
            },
            ValueType::Boolean => self.as_bool().map(Value::Boolean),
            ValueType::Date => match &self {
                Value::String(s) => parse_date(s.trim()).map(Value::Date),
                Value::Integer(ms) => DateTime::from_timestamp_millis(*ms).map(Value::Date),
                _ => None,
            },
            ValueType::Binary => match &self {
                Value::String(s) => Some(Value::Binary(s.as_bytes().to_vec())),
                _ => None,
            },
        };
        converted.ok_or_else(|| fail(&self))
    }

    /// Ordering used by comparisons. Numbers compare across integer/float,
    /// `Null` sorts first, and values of unrelated types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Integer(_) | Value::Number(_) | Value::BigNumber(_)
        )
    }

    /// Feed the value into a hasher for partitioning. Stable across runs.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::String(s) => {
                1u8.hash(state);
                s.hash(state);
            }
            Value::Number(v) => {
                2u8.hash(state);
                // -0.0 and 0.0 must land in the same partition.
                let v = if *v == 0.0 { 0.0 } else { *v };
                v.to_bits().hash(state);
            }
            Value::Integer(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Value::BigNumber(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Date(d) => {
                5u8.hash(state);
                d.timestamp_micros().hash(state);
            }
            Value::Boolean(b) => {
                6u8.hash(state);
                b.hash(state);
            }
            Value::Binary(b) => {
                7u8.hash(state);
                b.hash(state);
            }
        }
    }

    /// Convert a literal from a topology file.
    pub fn from_toml(value: &toml::Value) -> Value {
        match value {
            toml::Value::String(s) => Value::String(s.clone()),
            toml::Value::Integer(i) => Value::Integer(*i),
            toml::Value::Float(f) => Value::Number(*f),
            toml::Value::Boolean(b) => Value::Boolean(*b),
            toml::Value::Datetime(dt) => parse_date(&dt.to_string())
                .map(Value::Date)
                .unwrap_or_else(|| Value::String(dt.to_string())),
            other => Value::String(other.to_string()),
        }
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) | Value::BigNumber(s) => write!(f, "{}", s),
            Value::Number(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Value::Boolean(b) => write!(f, "{}", if *b { "Y" } else { "N" }),
            Value::Binary(b) => write!(f, "[{} bytes]", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// One record flowing between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Row {
    /// Pair values with their schema. The value count must match the schema.
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.len(), values.len(), "row does not match its schema");
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the named field (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .index_of(name)
            .and_then(|index| self.values.get(index))
    }
}
