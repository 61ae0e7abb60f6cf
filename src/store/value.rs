use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use std::collections::HashMap;

/// A dynamically typed bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A row ready for insertion, keyed by column name
#[derive(Debug, Default)]
pub struct ParsedRow {
    pub values: HashMap<&'static str, SqlValue>,
}

impl ParsedRow {
    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        self.values.insert(column, value.into());
    }

    /// Values in `columns` order; absent columns bind as NULL
    pub fn ordered(&self, columns: &[&'static str]) -> Vec<SqlValue> {
        columns
            .iter()
            .map(|c| self.values.get(c).cloned().unwrap_or(SqlValue::Null))
            .collect()
    }
}
