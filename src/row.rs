use crate::value::SqlValue;
use std::sync::Arc;

/// A raw result row: ordered column values, optionally with column names
///
/// Adapters share one `names` allocation across all rows of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Option<Arc<[String]>>,
    values: Vec<SqlValue>,
}

impl Row {
    /// A row without column names; fields are matched by position
    pub fn positional(values: Vec<SqlValue>) -> Self {
        Row {
            names: None,
            values,
        }
    }

    /// A row whose values are matched to fields by column name
    pub fn named(names: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Row {
            names: Some(names),
            values,
        }
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column index of `name`, if the row carries names
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names
            .as_ref()
            .and_then(|names| names.iter().position(|n| n == name))
    }

    /// Column name at `idx`, falling back to the index itself
    pub fn column_name(&self, idx: usize) -> String {
        self.names
            .as_ref()
            .and_then(|names| names.get(idx).cloned())
            .unwrap_or_else(|| idx.to_string())
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}
