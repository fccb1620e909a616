use crate::{
    result::{Result, SqlFnError},
    value::{FromValue, SqlValue},
};
use std::str::FromStr;

/// Declared type of a record field, driving the coercion applied by the row mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Any,
    Boolean,
    Integer,
    Float,
    Text,
    Blob,
    Json,
    Decimal,
    DateTime,
    Date,
}

impl FromStr for FieldType {
    type Err = SqlFnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(FieldType::Any),
            "boolean" => Ok(FieldType::Boolean),
            "integer" => Ok(FieldType::Integer),
            "float" => Ok(FieldType::Float),
            "text" | "string" => Ok(FieldType::Text),
            "blob" => Ok(FieldType::Blob),
            "json" => Ok(FieldType::Json),
            "decimal" => Ok(FieldType::Decimal),
            "datetime" => Ok(FieldType::DateTime),
            "date" => Ok(FieldType::Date),
            _ => Err(SqlFnError::new_configuration(format!(
                "unknown field type '{s}', expected any, boolean, integer, float, text, blob, json, decimal, datetime or date"
            ))),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldType::Any => "any",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Text => "text",
            FieldType::Blob => "blob",
            FieldType::Json => "json",
            FieldType::Decimal => "decimal",
            FieldType::DateTime => "datetime",
            FieldType::Date => "date",
        };
        write!(f, "{s}")
    }
}

/// A named, typed field of a target record type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Required fields must be present in every row; optional ones default to NULL
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Required field typed after a Rust type; NULL is only accepted later by `Option<T>`
    pub fn of<T: FromValue>(name: impl Into<String>) -> Self {
        FieldDef::required(name, T::field_type())
    }
}

/// Structural description of the record a row is mapped into
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Open record types take every column of the row as-is
    pub open: bool,
}

impl RecordType {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        RecordType {
            name: name.into(),
            fields,
            open: false,
        }
    }

    pub fn open(name: impl Into<String>) -> Self {
        RecordType {
            name: name.into(),
            fields: Vec::new(),
            open: true,
        }
    }

    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A mapped row: ordered field name to coerced value pairs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, SqlValue)>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Move the value of `name` out of the record and convert it
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T> {
        let slot = self
            .fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .ok_or_else(|| SqlFnError::new_missing_field(name))?;
        let value = std::mem::replace(&mut slot.1, SqlValue::Null);
        T::from_value(value).map_err(|e| e.with_field(name))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (name, value) in &self.fields {
            obj.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(obj)
    }
}

/// A Rust type rows can be mapped into
///
/// ```ignore
/// struct User { id: i64, salary: Option<Decimal> }
///
/// impl FromRecord for User {
///     fn record_type() -> RecordType {
///         RecordType::new("User", vec![FieldDef::of::<i64>("id"), FieldDef::of::<Option<Decimal>>("salary")])
///     }
///
///     fn from_record(mut record: Record) -> Result<Self> {
///         Ok(User { id: record.take("id")?, salary: record.take("salary")? })
///     }
/// }
/// ```
pub trait FromRecord: Sized {
    fn record_type() -> RecordType;

    fn from_record(record: Record) -> Result<Self>;
}

impl FromRecord for Record {
    fn record_type() -> RecordType {
        RecordType::open("Record")
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(record)
    }
}

impl FromRecord for serde_json::Value {
    fn record_type() -> RecordType {
        RecordType::open("JsonValue")
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(record.to_json())
    }
}
