//! Wire types for the libSQL "Hrana over HTTP" pipeline endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::RemoteError;

#[derive(Serialize, Debug)]
pub struct PipelineRequest {
    pub baton: Option<String>,
    pub requests: Vec<StreamRequest>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    Execute { stmt: Statement },
    Close,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    pub want_rows: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
            want_rows: true,
        }
    }

    pub fn bind(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }
}

/// A single SQL value. Integers travel as strings to survive JSON number limits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl Value {
    pub fn integer(v: i64) -> Self {
        Value::Integer {
            value: v.to_string(),
        }
    }

    pub fn text(v: impl Into<String>) -> Self {
        Value::Text { value: v.into() }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer { value } => value.parse().ok(),
            Value::Float { value } if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer { value } => value.parse().ok(),
            Value::Float { value } => Some(*value),
            _ => None,
        }
    }

    /// Text, or the decimal rendering of a number.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text { value } | Value::Integer { value } => Some(value.clone()),
            Value::Float { value } => Some(value.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer { value } | Value::Text { value } => write!(f, "{value}"),
            Value::Float { value } => write!(f, "{value}"),
            Value::Blob { base64 } => write!(f, "<blob {} b64 chars>", base64.len()),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct PipelineResponse {
    pub baton: Option<String>,
    pub results: Vec<StreamResult>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: StreamError },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    Execute { result: ResultSet },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StreamError {
    pub message: String,
    pub code: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Column {
    pub name: Option<String>,
    pub decltype: Option<String>,
}

/// Rows of one executed statement, addressed by column name.
#[derive(Deserialize, Debug, Clone)]
pub struct ResultSet {
    pub cols: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    fn index_of(&self, name: &str) -> Result<usize, RemoteError> {
        self.cols
            .iter()
            .position(|c| c.name.as_deref() == Some(name))
            .ok_or_else(|| RemoteError::Protocol(format!("column '{name}' missing from result")))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.cols
            .iter()
            .map(|c| c.name.as_deref().unwrap_or("?"))
            .collect()
    }

    /// First column of the first row, for single-value queries like `MAX(..)`.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row { set: self, values })
    }

    /// Map every row with `f`, failing on the first bad row.
    pub fn map_rows<T, F>(&self, mut f: F) -> Result<Vec<T>, RemoteError>
    where
        F: FnMut(&Row<'_>) -> Result<T, RemoteError>,
    {
        self.iter().map(|row| f(&row)).collect()
    }
}

pub struct Row<'a> {
    set: &'a ResultSet,
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    fn value(&self, name: &str) -> Result<&'a Value, RemoteError> {
        let idx = self.set.index_of(name)?;
        self.values
            .get(idx)
            .ok_or_else(|| RemoteError::Protocol(format!("row too short for column '{name}'")))
    }

    pub fn i64(&self, name: &str) -> Result<i64, RemoteError> {
        self.value(name)?
            .as_i64()
            .ok_or_else(|| type_error(name, "integer"))
    }

    pub fn f64(&self, name: &str) -> Result<f64, RemoteError> {
        self.value(name)?
            .as_f64()
            .ok_or_else(|| type_error(name, "number"))
    }

    pub fn opt_f64(&self, name: &str) -> Result<Option<f64>, RemoteError> {
        let value = self.value(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| type_error(name, "number"))
    }

    pub fn text(&self, name: &str) -> Result<String, RemoteError> {
        self.value(name)?
            .as_text()
            .ok_or_else(|| type_error(name, "text"))
    }

    pub fn opt_text(&self, name: &str) -> Result<Option<String>, RemoteError> {
        let value = self.value(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_text()
            .map(Some)
            .ok_or_else(|| type_error(name, "text"))
    }
}

fn type_error(column: &str, expected: &str) -> RemoteError {
    RemoteError::Protocol(format!("column '{column}' is not {expected}"))
}
