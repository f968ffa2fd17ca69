//! # Runtime Column Values
//!
//! [`Value`] is the runtime representation of a single column value, a
//! tagged sum over the storable scalar types plus SQL NULL. [`ColumnType`]
//! is the schema-side declaration a value is checked against. Both carry
//! serde derives because rows and catalog entries are persisted as JSON
//! payloads inside B+Tree leaves.
//!
//! The only implicit coercion is `Int` → `Float`: an integer literal is
//! accepted wherever a FLOAT column or index expects a float, matching the
//! usual SQL ergonomics. Everything else is a strict mismatch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Key;

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Int,
    Text,
    Float,
    Bool,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int => "INT",
            ColumnType::Text => "TEXT",
            ColumnType::Float => "FLOAT",
            ColumnType::Bool => "BOOLEAN",
        };
        f.write_str(name)
    }
}

/// A single column value at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Checks `self` against a declared column type, applying the Int→Float
    /// coercion. Returns the value to store.
    pub fn coerce_to(&self, column_type: ColumnType) -> Result<Value> {
        match (self, column_type) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Int(v), ColumnType::Int) => Ok(Value::Int(*v)),
            (Value::Int(v), ColumnType::Float) => Ok(Value::Float(*v as f64)),
            (Value::Float(v), ColumnType::Float) => Ok(Value::Float(*v)),
            (Value::Text(s), ColumnType::Text) => Ok(Value::Text(s.clone())),
            (Value::Bool(b), ColumnType::Bool) => Ok(Value::Bool(*b)),
            (value, expected) => Err(Error::SchemaViolation(format!(
                "value {value} is not compatible with column type {expected}"
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Converts a value into a B+Tree key for the given column type.
///
/// NULL is never indexable: the main tree needs a primary key and a
/// secondary index needs a defined value to sort by.
pub fn value_to_key(value: &Value, column_type: ColumnType) -> Result<Key> {
    match (value, column_type) {
        (Value::Null, _) => Err(Error::invalid("NULL cannot be used as a key")),
        (Value::Int(v), ColumnType::Int) => Ok(Key::Int(*v)),
        (Value::Int(v), ColumnType::Float) => Ok(Key::Float(*v as f64)),
        (Value::Float(v), ColumnType::Float) => Ok(Key::Float(*v)),
        (Value::Float(v), ColumnType::Int) => Ok(Key::Int(*v as i64)),
        (Value::Text(s), ColumnType::Text) => Ok(Key::Text(s.clone())),
        (Value::Bool(b), ColumnType::Bool) => Ok(Key::Bool(*b)),
        (value, expected) => Err(Error::SchemaViolation(format!(
            "value {value} cannot form a {expected} key"
        ))),
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
