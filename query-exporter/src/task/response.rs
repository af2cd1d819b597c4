use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MappingError;

/// Label value bound when the response does not carry the label's column, or carries a null.
pub const NULL_LABEL: &str = "";

/// A single column value of a query result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ColumnValue {
    /// Numeric value used to update a metric; null resolves to 0.0.
    pub fn to_metric_value(&self, column: &str) -> Result<f64, MappingError> {
        match self {
            Self::Null => Ok(0.0),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Integer(i) => Ok(*i as f64),
            Self::Float(f) => Ok(*f),
            Self::Text(text) => text.trim().parse::<f64>().map_err(|_| MappingError::NotNumeric {
                column: column.to_string(),
                value: text.clone(),
            }),
        }
    }

    pub fn to_label_value(&self) -> String {
        match self {
            Self::Null => NULL_LABEL.to_string(),
            Self::Text(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<serde_json::Value> for ColumnValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Text(n.to_string())),
            Value::String(s) => Self::Text(s),
            other => Self::Text(other.to_string()),
        }
    }
}

/// The first row of a task's most recent query, keyed by lower-cased column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response(HashMap<String, ColumnValue>);

impl Response {
    pub fn from_columns<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = (String, ColumnValue)>,
    {
        Self(
            columns
                .into_iter()
                .map(|(name, value)| (name.to_lowercase(), value))
                .collect(),
        )
    }

    /// Case-insensitive column lookup.
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.0.get(column.to_lowercase().as_str())
    }

    /// Update value for the metric named `column`, defaulting to 0.0 when absent or null.
    pub fn metric_value(&self, column: &str) -> Result<f64, MappingError> {
        self.get(column).map_or(Ok(0.0), |value| value.to_metric_value(column))
    }

    /// Label values for `labels`, in order, with absent columns bound to [`NULL_LABEL`].
    pub fn label_values(&self, labels: &[String]) -> Vec<String> {
        labels
            .iter()
            .map(|label| {
                self.get(label)
                    .map_or_else(|| NULL_LABEL.to_string(), ColumnValue::to_label_value)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
