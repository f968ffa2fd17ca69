//! # Rows
//!
//! A [`Row`] maps column names to typed [`Value`]s. Rows are validated
//! against a [`TableSchema`] at construction: arity, NOT NULL, and type
//! compatibility (with the Int→Float coercion) are all enforced before a
//! row ever reaches the storage layer. Serialized rows are the opaque value
//! bytes stored in table leaves; the encoding is serde_json over a sorted
//! map, which keeps the bytes deterministic for a given row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{value_to_key, Key, Value};

use super::TableSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Builds a row from positional values, validating against the schema.
    pub fn from_values(schema: &TableSchema, values: &[Value]) -> Result<Row> {
        if values.len() != schema.columns.len() {
            return Err(Error::invalid(format!(
                "table '{}' expects {} values, got {}",
                schema.name,
                schema.columns.len(),
                values.len()
            )));
        }

        let mut row = BTreeMap::new();
        for (column, value) in schema.columns.iter().zip(values) {
            if value.is_null() && column.not_null {
                return Err(Error::invalid(format!(
                    "column '{}' cannot be NULL",
                    column.name
                )));
            }
            let stored = value.coerce_to(column.column_type).map_err(|_| {
                Error::SchemaViolation(format!(
                    "column '{}' is {}, got {}",
                    column.name, column.column_type, value
                ))
            })?;
            row.insert(column.name.clone(), stored);
        }

        Ok(Row { values: row })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Positional values in schema column order, for callers that want to
    /// display or re-insert a row.
    pub fn to_values(&self, schema: &TableSchema) -> Vec<Value> {
        schema
            .columns
            .iter()
            .map(|c| self.values.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Extracts the primary key of this row.
    pub fn primary_key(&self, schema: &TableSchema) -> Result<Key> {
        let column = schema.primary_key_column().ok_or_else(|| {
            Error::SchemaViolation(format!("table '{}' has no primary key", schema.name))
        })?;
        self.key_for_column(schema, &column.name)
    }

    /// Converts the value of `column_name` into a B+Tree key, as used by
    /// secondary indexes.
    pub fn key_for_column(&self, schema: &TableSchema, column_name: &str) -> Result<Key> {
        let column = schema.column(column_name).ok_or_else(|| {
            Error::not_found(format!(
                "column '{}' in table '{}'",
                column_name, schema.name
            ))
        })?;
        let value = self.values.get(column_name).ok_or_else(|| {
            Error::not_found(format!("column '{column_name}' missing from row"))
        })?;
        value_to_key(value, column.column_type)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Row> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::types::ColumnType;

    fn users_schema() -> TableSchema {
        TableSchema {
            name: "users".into(),
            columns: vec![
                Column::new("id", ColumnType::Int).primary_key(),
                Column::new("name", ColumnType::Text).not_null(),
                Column::new("age", ColumnType::Int),
            ],
            root_page: 2,
            version: 1,
        }
    }

    #[test]
    fn from_values_builds_a_valid_row() {
        let row = Row::from_values(
            &users_schema(),
            &[Value::Int(1), Value::Text("Alice".into()), Value::Int(25)],
        )
        .unwrap();

        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("name"), Some(&Value::Text("Alice".into())));
        assert_eq!(row.get("age"), Some(&Value::Int(25)));
    }

    #[test]
    fn from_values_checks_arity() {
        let err = Row::from_values(&users_schema(), &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("expects 3 values"));
    }

    #[test]
    fn from_values_enforces_not_null() {
        let err = Row::from_values(
            &users_schema(),
            &[Value::Int(1), Value::Null, Value::Int(25)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn from_values_allows_null_in_nullable_column() {
        let row = Row::from_values(
            &users_schema(),
            &[Value::Int(1), Value::Text("A".into()), Value::Null],
        )
        .unwrap();
        assert_eq!(row.get("age"), Some(&Value::Null));
    }

    #[test]
    fn from_values_rejects_type_mismatch() {
        let err = Row::from_values(
            &users_schema(),
            &[
                Value::Text("one".into()),
                Value::Text("A".into()),
                Value::Int(25),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn primary_key_extraction() {
        let row = Row::from_values(
            &users_schema(),
            &[Value::Int(42), Value::Text("A".into()), Value::Int(1)],
        )
        .unwrap();

        assert_eq!(row.primary_key(&users_schema()).unwrap(), Key::Int(42));
    }

    #[test]
    fn primary_key_requires_a_pk_column() {
        let schema = TableSchema {
            name: "nopk".into(),
            columns: vec![Column::new("a", ColumnType::Int)],
            root_page: 2,
            version: 1,
        };
        let row = Row::from_values(&schema, &[Value::Int(1)]).unwrap();

        let err = row.primary_key(&schema).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn rows_round_trip_through_bytes() {
        let schema = users_schema();
        let row = Row::from_values(
            &schema,
            &[Value::Int(7), Value::Text("Bob".into()), Value::Null],
        )
        .unwrap();

        let bytes = row.to_bytes().unwrap();
        assert_eq!(Row::from_bytes(&bytes).unwrap(), row);
    }

    #[test]
    fn serialization_is_deterministic() {
        let schema = users_schema();
        let values = [Value::Int(7), Value::Text("Bob".into()), Value::Int(3)];
        let a = Row::from_values(&schema, &values).unwrap().to_bytes().unwrap();
        let b = Row::from_values(&schema, &values).unwrap().to_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn to_values_restores_schema_order() {
        let schema = users_schema();
        let values = vec![Value::Int(7), Value::Text("Bob".into()), Value::Int(3)];
        let row = Row::from_values(&schema, &values).unwrap();
        assert_eq!(row.to_values(&schema), values);
    }
}
