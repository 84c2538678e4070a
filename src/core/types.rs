use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DataType, DbError, Result, Value};

pub type Row = Vec<Value>;

/// Name of the implicit column that stores each row's concrete type.
pub const DISCRIMINATOR_COLUMN: &str = "__type";

/// Physical column of a hierarchy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default)]
    pub key: bool,
    /// Entity type that declares the field.
    pub owner: String,
    /// Target type name for reference columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            key: false,
            owner: owner.into(),
            references: None,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.data_type = DataType::Reference;
        self.references = Some(target.into());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Value given to rows that existed before this column.
    pub fn fill_value(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        if self.nullable {
            Value::Null
        } else {
            self.data_type.zero_value()
        }
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }

    /// Column clause for DDL rendering.
    pub fn to_sql(&self) -> String {
        let mut sql = match &self.references {
            Some(target) => format!("{} REFERENCES {}", quote_ident(&self.name), quote_ident(target)),
            None => format!("{} {}", quote_ident(&self.name), self.data_type.sql_name()),
        };
        if self.key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(&format!(" DEFAULT {}", sql_literal(default)));
        }
        sql
    }
}

/// Primary key of a stored row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(Self::Int(*i)),
            Value::Text(s) => Ok(Self::Text(s.clone())),
            other => Err(DbError::TypeMismatch(format!(
                "{} cannot be used as an entity key",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Integer(*i),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Quotes an identifier for SQL rendering.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders a value as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::DateTime(_) => format!("TIMESTAMP '{}'", value),
    }
}
