use crate::{
    connection::{self, Capabilities},
    query::{Params, QueryDescription},
    result::{KIND_PROGRAMMING, Result, SqlFnError},
    row::Row,
    str_utils,
    value::SqlValue,
};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use std::sync::Arc;

// Bind values as the affinities SQLite stores them with
impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Boolean(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)), // SQLite represents booleans as integers
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            SqlValue::Decimal(d) => ToSqlOutput::Owned(Value::Text(d.to_string())),
            SqlValue::DateTime(dt) => ToSqlOutput::Owned(Value::Text(dt.to_rfc3339())),
            SqlValue::Date(d) => ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string())),
            SqlValue::Json(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
        })
    }
}

/// Classify a rusqlite error into the kind recorded in `fails_by_error`
pub fn driver_error(err: rusqlite::Error) -> SqlFnError {
    use rusqlite::ErrorCode;

    let kind = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => "IntegrityError",
            ErrorCode::TooBig | ErrorCode::TypeMismatch => "DataError",
            ErrorCode::Unknown
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::ReadOnly
            | ErrorCode::OperationInterrupted
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::CannotOpen
            | ErrorCode::PermissionDenied => "OperationalError",
            ErrorCode::ApiMisuse | ErrorCode::ParameterOutOfRange => KIND_PROGRAMMING,
            _ => "DatabaseError",
        },
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::MultipleStatement => KIND_PROGRAMMING,
        rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::Utf8Error(..) => "DataError",
        _ => "DatabaseError",
    };
    SqlFnError::new_driver(kind, err.to_string())
}

/// Convert a rusqlite row into a uniform [`Row`]
pub fn row_values(row: &rusqlite::Row<'_>, names: &Arc<[String]>) -> Result<Row> {
    let mut values = Vec::with_capacity(names.len());
    for idx in 0..names.len() {
        let value = match row.get_ref(idx).map_err(driver_error)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(r) => SqlValue::Float(r),
            ValueRef::Text(s) => SqlValue::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        };
        values.push(value);
    }
    Ok(Row::named(names.clone(), values))
}

/// Name of the `index`th placeholder without its `@`, `:` or `$` prefix; `?N` when it has none
fn parameter_label(stmt: &rusqlite::Statement<'_>, index: usize) -> String {
    match stmt.parameter_name(index) {
        Some(name) => name.trim_start_matches(['@', ':', '$']).to_string(),
        None => format!("?{index}"),
    }
}

/// Bind every placeholder SQLite reports for the prepared statement
///
/// A placeholder left without a value fails with `ParameterNotProvided`.
fn bind(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> Result<()> {
    let expected = stmt.parameter_count();
    match params {
        Params::None => {
            if expected > 0 {
                return Err(SqlFnError::new_parameter_not_provided(parameter_label(stmt, 1)));
            }
        }
        Params::Positional(values) => {
            if values.len() != expected {
                return Err(SqlFnError::new_driver(
                    KIND_PROGRAMMING,
                    format!(
                        "Incorrect number of bindings supplied. The current statement uses {expected}, and there are {} supplied.",
                        values.len()
                    ),
                ));
            }
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)
                    .map_err(driver_error)?;
            }
        }
        Params::Named(values) => {
            for index in 1..=expected {
                let name = parameter_label(stmt, index);
                let value = str_utils::lookup(values, &name)?;
                stmt.raw_bind_parameter(index, value)
                    .map_err(driver_error)?;
            }
        }
    }
    Ok(())
}

/// A prepared statement together with the row stream borrowing it
#[ouroboros::self_referencing]
struct LiveRows<'c> {
    statement: rusqlite::Statement<'c>,
    #[borrows(mut statement)]
    #[covariant]
    rows: rusqlite::Rows<'this>,
}

/// Cursor stepping a live SQLite statement one row at a time
///
/// The first step happens at execute time, so DML is applied and driver
/// errors surface before any row is requested.
pub struct SqliteCursor<'c> {
    live: LiveRows<'c>,
    names: Arc<[String]>,
    peeked: Option<Row>,
}

impl<'c> SqliteCursor<'c> {
    fn open(mut statement: rusqlite::Statement<'c>, params: &Params) -> Result<Self> {
        bind(&mut statement, params)?;
        let names: Arc<[String]> = statement
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let mut cursor = SqliteCursor {
            live: LiveRows::new(statement, |statement| statement.raw_query()),
            names,
            peeked: None,
        };
        cursor.peeked = cursor.step()?;
        Ok(cursor)
    }

    fn step(&mut self) -> Result<Option<Row>> {
        let names = &self.names;
        self.live
            .with_rows_mut(|rows| match rows.next().map_err(driver_error)? {
                Some(row) => row_values(row, names).map(Some),
                None => Ok(None),
            })
    }
}

impl connection::Cursor for SqliteCursor<'_> {
    fn fetch_one(&mut self) -> Result<Option<Row>> {
        match self.peeked.take() {
            Some(row) => Ok(Some(row)),
            None => self.step(),
        }
    }
}

fn run<'c>(conn: &'c rusqlite::Connection, query: &QueryDescription) -> Result<SqliteCursor<'c>> {
    let statement = match query {
        QueryDescription::Text(statement) => statement,
        QueryDescription::Native(_) => {
            return Err(SqlFnError::new_driver(
                "NotSupportedError",
                "the SQLite adapter only runs textual statements",
            ));
        }
    };
    let sql = statement
        .sql()
        .ok_or_else(|| SqlFnError::new_configuration("statement has no SQL text"))?;

    let prepared = conn.prepare(sql).map_err(driver_error)?;
    SqliteCursor::open(prepared, &statement.params)
}

impl Capabilities for rusqlite::Connection {}

impl connection::Connection for rusqlite::Connection {
    type Cursor<'c>
        = SqliteCursor<'c>
    where
        Self: 'c;

    fn execute<'c>(&'c mut self, query: &QueryDescription) -> Result<SqliteCursor<'c>> {
        run(self, query)
    }
}

impl Capabilities for rusqlite::Transaction<'_> {}

impl connection::Connection for rusqlite::Transaction<'_> {
    type Cursor<'c>
        = SqliteCursor<'c>
    where
        Self: 'c;

    fn execute<'c>(&'c mut self, query: &QueryDescription) -> Result<SqliteCursor<'c>> {
        run(self, query)
    }
}
