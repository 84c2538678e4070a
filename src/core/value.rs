use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Compares two values, allowing implicit integer/float coercion.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            // NULL is "greater" than all values (NULL LAST)
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Greater),
            (_, Value::Null) => Ok(Ordering::Less),

            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),

            (Value::Integer(a), Value::Float(b)) => Ok((*a as f64).total_cmp(b)),
            (Value::Float(a), Value::Integer(b)) => Ok(a.total_cmp(&(*b as f64))),

            _ => Err(DbError::TypeMismatch(format!(
                "Cannot compare incompatible types: {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::DateTime(_) => "DATETIME",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) => 2,
            Self::Float(_) => 3,
            Self::DateTime(_) => 4,
            Self::Text(_) => 5,
        }
    }

    /// Stable byte encoding used for hashing row contents.
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        out.push(self.rank());
        match self {
            Self::Null => {}
            Self::Boolean(b) => out.push(u8::from(*b)),
            Self::Integer(i) => out.extend_from_slice(&i.to_le_bytes()),
            Self::Float(f) => out.extend_from_slice(&f.to_bits().to_le_bytes()),
            Self::DateTime(dt) => {
                out.extend_from_slice(&dt.and_utc().timestamp_micros().to_le_bytes());
            }
            Self::Text(s) => {
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
}

// Total order: values of different kinds are ordered by kind, floats by `total_cmp`.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut bytes = Vec::new();
        self.write_canonical(&mut bytes);
        bytes.hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f64::from(f))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Self::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Semantic type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    DateTime,
    String,
    /// String additionally indexed for full-text search.
    Text,
    /// Key of another entity type.
    Reference,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Int16, Value::Integer(i)) => i16::try_from(*i).is_ok(),
            (Self::Int32, Value::Integer(i)) => i32::try_from(*i).is_ok(),
            (Self::Int64, Value::Integer(_)) => true,
            (Self::Float32 | Self::Float64, Value::Float(_) | Value::Integer(_)) => true,
            (Self::DateTime, Value::DateTime(_)) => true,
            (Self::String | Self::Text, Value::Text(_)) => true,
            (Self::Reference, Value::Integer(_) | Value::Text(_)) => true,
            _ => false,
        }
    }

    /// Brings a compatible value into its stored representation.
    pub fn normalize(&self, value: Value) -> Result<Value> {
        if !self.is_compatible(&value) {
            return Err(DbError::TypeMismatch(format!(
                "expected {}, got {} ({})",
                self,
                value.type_name(),
                value
            )));
        }
        Ok(match (self, value) {
            (Self::Float32, Value::Integer(i)) => Value::Float(f64::from(i as f32)),
            (Self::Float32, Value::Float(f)) => Value::Float(f64::from(f as f32)),
            (Self::Float64, Value::Integer(i)) => Value::Float(i as f64),
            (_, value) => value,
        })
    }

    /// Converts a stored value of another type into this type.
    pub fn convert(&self, value: &Value) -> Result<Value> {
        let converted = match (self, value) {
            (_, Value::Null) => Value::Null,
            (_, v) if self.is_compatible(v) => v.clone(),
            (Self::String | Self::Text, v) => Value::Text(v.to_string()),
            (Self::Boolean, Value::Integer(0)) => Value::Boolean(false),
            (Self::Boolean, Value::Integer(1)) => Value::Boolean(true),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => return Err(self.conversion_error(value)),
            },
            (Self::Int16 | Self::Int32 | Self::Int64 | Self::Reference, Value::Boolean(b)) => {
                Value::Integer(i64::from(*b))
            }
            (Self::Int16 | Self::Int32 | Self::Int64, Value::Float(f)) => {
                if f.fract() != 0.0 || !f.is_finite() {
                    return Err(self.conversion_error(value));
                }
                Value::Integer(*f as i64)
            }
            (Self::Int16 | Self::Int32 | Self::Int64 | Self::Reference, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| self.conversion_error(value))?,
            (Self::Float32 | Self::Float64, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.conversion_error(value))?,
            (Self::DateTime, Value::Text(s)) => parse_datetime(s.trim())
                .map(Value::DateTime)
                .ok_or_else(|| self.conversion_error(value))?,
            _ => return Err(self.conversion_error(value)),
        };
        self.normalize(converted)
            .map_err(|_| self.conversion_error(value))
    }

    fn conversion_error(&self, value: &Value) -> DbError {
        DbError::TypeMismatch(format!("cannot convert {} '{}' to {}", value.type_name(), value, self))
    }

    /// Every value of `self` is representable as `other` without change.
    pub fn is_widening_to(&self, other: &DataType) -> bool {
        matches!(
            (self, other),
            (Self::Int16, Self::Int32 | Self::Int64)
                | (Self::Int32, Self::Int64)
                | (Self::Float32, Self::Float64)
                | (Self::String, Self::Text)
                | (Self::Text, Self::String)
        ) || self == other
    }

    pub fn is_key_type(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64 | Self::String)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String | Self::Text)
    }

    /// Value written into existing rows when a non-nullable column appears without a default.
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Int16 | Self::Int32 | Self::Int64 => Value::Integer(0),
            Self::Float32 | Self::Float64 => Value::Float(0.0),
            Self::DateTime => Value::DateTime(NaiveDateTime::default()),
            Self::String | Self::Text => Value::Text(String::new()),
            Self::Reference => Value::Null,
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Int16 => "SMALLINT",
            Self::Int32 => "INTEGER",
            Self::Int64 => "BIGINT",
            Self::Float32 => "REAL",
            Self::Float64 => "DOUBLE PRECISION",
            Self::DateTime => "TIMESTAMP",
            Self::String => "VARCHAR",
            Self::Text => "TEXT",
            Self::Reference => "REFERENCE",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::DateTime => "datetime",
            Self::String => "string",
            Self::Text => "text",
            Self::Reference => "reference",
        };
        write!(f, "{}", name)
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
