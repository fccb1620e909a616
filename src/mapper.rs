//! Row mapper: raw rows into records of a declared target type
//!
//! Drivers disagree on which columns come back already typed, so every coercion
//! accepts a value that already has the declared type and returns it unchanged.

use crate::{
    decimal::Decimal,
    record::{FieldType, FromRecord, Record, RecordType},
    result::{Result, SqlFnError},
    row::Row,
    value::{FromValue, SqlValue},
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const OFFSET_DATETIME_FORMATS: [&str; 2] =
    ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Map a raw row into a record of `target`
///
/// Fields are located by name when the row carries column names, otherwise by
/// declared position.
pub fn map_row(row: Row, target: &RecordType) -> Result<Record> {
    let mut record = Record::new();

    if target.open {
        let names: Vec<String> = (0..row.len()).map(|idx| row.column_name(idx)).collect();
        for (name, value) in names.into_iter().zip(row.into_values()) {
            record.push(name, value);
        }
        return Ok(record);
    }

    for (idx, field) in target.fields.iter().enumerate() {
        let position = if row.names().is_some() {
            row.position(&field.name)
        } else if idx < row.len() {
            Some(idx)
        } else {
            None
        };

        let value = match position {
            Some(pos) => row.values()[pos].clone(),
            None if field.required => return Err(SqlFnError::new_missing_field(&field.name)),
            None => SqlValue::Null,
        };

        let coerced = coerce(value, field.field_type).map_err(|e| e.with_field(&field.name))?;
        record.push(field.name.clone(), coerced);
    }

    Ok(record)
}

/// Map a row into `T` using the record type captured at decoration time
pub fn record_from_row<T: FromRecord>(row: Row, target: &RecordType) -> Result<T> {
    T::from_record(map_row(row, target)?)
}

/// First column of the row, coerced to `field_type`
pub fn map_scalar(row: Row, field_type: FieldType) -> Result<SqlValue> {
    let column = row.column_name(0);
    let value = row
        .into_values()
        .into_iter()
        .next()
        .ok_or_else(|| SqlFnError::new_missing_field(column.clone()))?;
    coerce(value, field_type).map_err(|e| e.with_field(&column))
}

/// First column of the row converted into `T`
pub fn scalar_from_row<T: FromValue>(row: Row) -> Result<T> {
    let column = row.column_name(0);
    let value = map_scalar(row, T::field_type())?;
    T::from_value(value).map_err(|e| e.with_field(&column))
}

fn mismatch(value: &SqlValue, field_type: FieldType) -> SqlFnError {
    SqlFnError::new_mapping(
        "",
        value,
        format!("cannot coerce {} to {field_type}", value.type_name()),
    )
}

/// Coerce a raw column value into the declared field type
///
/// NULL passes through; whether it is acceptable is decided by the record's `FromValue` target.
pub fn coerce(value: SqlValue, field_type: FieldType) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(value);
    }

    match field_type {
        FieldType::Any => Ok(value),
        FieldType::Boolean => match value {
            SqlValue::Boolean(_) => Ok(value),
            SqlValue::Integer(0) => Ok(SqlValue::Boolean(false)),
            SqlValue::Integer(1) => Ok(SqlValue::Boolean(true)),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Integer => match value {
            SqlValue::Integer(_) => Ok(value),
            SqlValue::Boolean(b) => Ok(SqlValue::Integer(b as i64)),
            SqlValue::Decimal(d) => d
                .to_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| mismatch(&SqlValue::Decimal(d), field_type)),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Float => match value {
            SqlValue::Float(_) => Ok(value),
            SqlValue::Integer(i) => Ok(SqlValue::Float(i as f64)),
            SqlValue::Decimal(d) => Ok(SqlValue::Float(d.to_f64())),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Text => match value {
            SqlValue::Text(_) => Ok(value),
            SqlValue::Integer(i) => Ok(SqlValue::Text(i.to_string())),
            SqlValue::Float(f) => Ok(SqlValue::Text(f.to_string())),
            SqlValue::Decimal(d) => Ok(SqlValue::Text(d.to_string())),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Blob => match value {
            SqlValue::Blob(_) => Ok(value),
            SqlValue::Text(s) => Ok(SqlValue::Blob(s.into_bytes())),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Json => match value {
            SqlValue::Json(_) => Ok(value),
            SqlValue::Text(s) => serde_json::from_str(&s)
                .map(SqlValue::Json)
                .map_err(|e| SqlFnError::new_mapping("", format!("{s:?}"), e.to_string())),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Decimal => match value {
            SqlValue::Decimal(_) => Ok(value),
            SqlValue::Integer(i) => Ok(SqlValue::Decimal(Decimal::from(i))),
            SqlValue::Float(f) => Decimal::from_f64(f).map(SqlValue::Decimal),
            SqlValue::Text(s) => s.parse::<Decimal>().map(SqlValue::Decimal),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::DateTime => match value {
            SqlValue::DateTime(_) => Ok(value),
            SqlValue::Text(s) => parse_datetime(&s).map(SqlValue::DateTime),
            SqlValue::Integer(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| SqlValue::DateTime(dt.fixed_offset()))
                .ok_or_else(|| SqlFnError::new_mapping("", secs, "timestamp out of range")),
            other => Err(mismatch(&other, field_type)),
        },
        FieldType::Date => match value {
            SqlValue::Date(_) => Ok(value),
            SqlValue::DateTime(dt) => Ok(SqlValue::Date(dt.date_naive())),
            SqlValue::Text(s) => parse_date(&s).map(SqlValue::Date),
            other => Err(mismatch(&other, field_type)),
        },
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<FixedOffset>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt);
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc().fixed_offset());
    }
    Err(SqlFnError::new_mapping(
        "",
        format!("{s:?}"),
        "invalid datetime",
    ))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    let trimmed = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Ok(date);
    }
    parse_datetime(trimmed)
        .map(|dt| dt.date_naive())
        .map_err(|_| SqlFnError::new_mapping("", format!("{s:?}"), "invalid date"))
}
