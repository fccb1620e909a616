use crate::{
    decimal::Decimal,
    record::FieldType,
    result::{Result, SqlFnError},
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::fmt;

/// A single column value as produced by a driver adapter or bound as a query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Decimal(Decimal),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Name of the variant, used in mapping error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Boolean(_) => "boolean",
            SqlValue::Integer(_) => "integer",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Date(_) => "date",
            SqlValue::Json(_) => "json",
        }
    }

    /// Render the value as JSON; blobs become byte arrays and rich types become strings
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Boolean(b) => serde_json::Value::Bool(*b),
            SqlValue::Integer(i) => serde_json::Value::Number((*i).into()),
            SqlValue::Float(f) => serde_json::Value::from(*f),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Blob(b) => serde_json::Value::Array(
                b.iter()
                    .map(|&byte| serde_json::Value::Number(byte.into()))
                    .collect(),
            ),
            SqlValue::Decimal(d) => serde_json::Value::String(d.to_string()),
            SqlValue::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            SqlValue::Date(d) => serde_json::Value::String(d.to_string()),
            SqlValue::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Boolean(b) => write!(f, "{b}"),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Float(x) => write!(f, "{x}"),
            SqlValue::Text(s) => write!(f, "{s:?}"),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
            SqlValue::Decimal(d) => write!(f, "{d}"),
            SqlValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            SqlValue::Date(d) => write!(f, "{d}"),
            SqlValue::Json(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_for_sql_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    SqlValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_for_sql_value! {
    bool => Boolean,
    i64 => Integer,
    i32 => Integer,
    i16 => Integer,
    u32 => Integer,
    f64 => Float,
    f32 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Blob,
    Decimal => Decimal,
    DateTime<FixedOffset> => DateTime,
    NaiveDate => Date,
    serde_json::Value => Json,
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::DateTime(value.fixed_offset())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// Conversion of an already-coerced column value into a Rust type
///
/// `field_type` tells the mapper which coercion to apply before `from_value` runs.
pub trait FromValue: Sized {
    fn field_type() -> FieldType;

    fn from_value(value: SqlValue) -> Result<Self>;
}

fn unexpected(expected: &str, value: &SqlValue) -> SqlFnError {
    SqlFnError::new_mapping(
        "",
        value,
        format!("expected {expected}, got {}", value.type_name()),
    )
}

macro_rules! impl_from_value {
    ($ty:ty, $field_type:ident, $expected:literal, $pattern:pat => $out:expr) => {
        impl FromValue for $ty {
            fn field_type() -> FieldType {
                FieldType::$field_type
            }

            fn from_value(value: SqlValue) -> Result<Self> {
                match value {
                    $pattern => Ok($out),
                    other => Err(unexpected($expected, &other)),
                }
            }
        }
    };
}

impl_from_value!(bool, Boolean, "boolean", SqlValue::Boolean(b) => b);
impl_from_value!(i64, Integer, "integer", SqlValue::Integer(i) => i);
impl_from_value!(f64, Float, "float", SqlValue::Float(f) => f);
impl_from_value!(String, Text, "text", SqlValue::Text(s) => s);
impl_from_value!(Vec<u8>, Blob, "blob", SqlValue::Blob(b) => b);
impl_from_value!(Decimal, Decimal, "decimal", SqlValue::Decimal(d) => d);
impl_from_value!(DateTime<FixedOffset>, DateTime, "datetime", SqlValue::DateTime(dt) => dt);
impl_from_value!(DateTime<Utc>, DateTime, "datetime", SqlValue::DateTime(dt) => dt.with_timezone(&Utc));
impl_from_value!(NaiveDate, Date, "date", SqlValue::Date(d) => d);
impl_from_value!(serde_json::Value, Json, "json", SqlValue::Json(v) => v);

impl FromValue for i32 {
    fn field_type() -> FieldType {
        FieldType::Integer
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Integer(i) => i32::try_from(i)
                .map_err(|_| SqlFnError::new_mapping("", i, "integer out of i32 range")),
            other => Err(unexpected("integer", &other)),
        }
    }
}

impl FromValue for SqlValue {
    fn field_type() -> FieldType {
        FieldType::Any
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_exact_types() {
        assert_eq!(i64::from_value(SqlValue::Integer(5)).unwrap(), 5);
        assert_eq!(
            String::from_value(SqlValue::Text("x".into())).unwrap(),
            "x".to_string()
        );
        assert!(bool::from_value(SqlValue::Boolean(true)).unwrap());
        assert!(i64::from_value(SqlValue::Text("5".into())).is_err());
    }

    #[test]
    fn test_from_value_null_handling() {
        assert_eq!(Option::<i64>::from_value(SqlValue::Null).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_value(SqlValue::Integer(3)).unwrap(),
            Some(3)
        );
        let err = i64::from_value(SqlValue::Null).unwrap_err();
        assert_eq!(err.error_kind(), "MappingError");
    }

    #[test]
    fn test_i32_range_check() {
        assert_eq!(i32::from_value(SqlValue::Integer(7)).unwrap(), 7);
        assert!(i32::from_value(SqlValue::Integer(i64::MAX)).is_err());
    }

    #[test]
    fn test_to_json() {
        assert_eq!(SqlValue::Integer(1).to_json(), serde_json::json!(1));
        assert_eq!(
            SqlValue::Blob(vec![1, 2, 3]).to_json(),
            serde_json::json!([1, 2, 3])
        );
        let d: Decimal = "12.50".parse().unwrap();
        assert_eq!(SqlValue::Decimal(d).to_json(), serde_json::json!("12.50"));
        assert_eq!(SqlValue::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("a")), SqlValue::Text("a".into()));
    }
}
