use crate::{
    connection::{AsyncConnection, AsyncCursor, Capabilities},
    decimal::Decimal,
    mapper::coerce,
    query::{Params, QueryDescription},
    record::FieldType,
    result::{Result, SqlFnError},
    row::Row,
    str_utils,
    value::{FromValue, SqlValue},
};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::StreamExt;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, RowStream, Transaction};

// PostgreSQL type OIDs for all column types
const POSTGRES_TYPE_OID_BOOL: u32 = 16;
const POSTGRES_TYPE_OID_BYTEA: u32 = 17;
const POSTGRES_TYPE_OID_INT2: u32 = 21;
const POSTGRES_TYPE_OID_INT4: u32 = 23;
const POSTGRES_TYPE_OID_INT8: u32 = 20;
const POSTGRES_TYPE_OID_FLOAT4: u32 = 700;
const POSTGRES_TYPE_OID_FLOAT8: u32 = 701;
const POSTGRES_TYPE_OID_TEXT: u32 = 25;
const POSTGRES_TYPE_OID_VARCHAR: u32 = 1043;
const POSTGRES_TYPE_OID_BPCHAR: u32 = 1042;
const POSTGRES_TYPE_OID_NAME: u32 = 19;
const POSTGRES_TYPE_OID_JSON: u32 = 114;
const POSTGRES_TYPE_OID_JSONB: u32 = 3802;
const POSTGRES_TYPE_OID_NUMERIC: u32 = 1700;
const POSTGRES_TYPE_OID_DATE: u32 = 1082;
const POSTGRES_TYPE_OID_TIMESTAMP: u32 = 1114;
const POSTGRES_TYPE_OID_TIMESTAMPTZ: u32 = 1184;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NBASE: u128 = 10_000;

type BoxError = Box<dyn Error + Sync + Send>;

/// Classify a tokio-postgres error by its SQLSTATE class
pub fn driver_error(err: tokio_postgres::Error) -> SqlFnError {
    let kind = match err.code() {
        Some(state) => kind_for_sqlstate(state.code()),
        None if err.is_closed() => "OperationalError",
        None => "DatabaseError",
    };
    SqlFnError::new_driver(kind, err.to_string())
}

fn kind_for_sqlstate(code: &str) -> &'static str {
    match code.get(..2) {
        Some("23") => "IntegrityError",
        Some("42") => "ProgrammingError",
        Some("22") => "DataError",
        Some("0A") => "NotSupportedError",
        Some("08") | Some("40") | Some("53") | Some("57") => "OperationalError",
        _ => "DatabaseError",
    }
}

fn from_value<T: FromValue>(value: &SqlValue, field_type: FieldType) -> std::result::Result<T, BoxError> {
    Ok(T::from_value(coerce(value.clone(), field_type)?)?)
}

// Values are coerced to the parameter type the server inferred for each placeholder
impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        match ty.oid() {
            POSTGRES_TYPE_OID_BOOL => from_value::<bool>(self, FieldType::Boolean)?.to_sql(ty, out),
            POSTGRES_TYPE_OID_INT2 => {
                i16::try_from(from_value::<i64>(self, FieldType::Integer)?)?.to_sql(ty, out)
            }
            POSTGRES_TYPE_OID_INT4 => {
                i32::try_from(from_value::<i64>(self, FieldType::Integer)?)?.to_sql(ty, out)
            }
            POSTGRES_TYPE_OID_INT8 => from_value::<i64>(self, FieldType::Integer)?.to_sql(ty, out),
            POSTGRES_TYPE_OID_FLOAT4 => {
                (from_value::<f64>(self, FieldType::Float)? as f32).to_sql(ty, out)
            }
            POSTGRES_TYPE_OID_FLOAT8 => from_value::<f64>(self, FieldType::Float)?.to_sql(ty, out),
            POSTGRES_TYPE_OID_NUMERIC => {
                from_value::<Decimal>(self, FieldType::Decimal)?.to_sql(ty, out)
            }
            POSTGRES_TYPE_OID_DATE => from_value::<NaiveDate>(self, FieldType::Date)?.to_sql(ty, out),
            POSTGRES_TYPE_OID_TIMESTAMP => from_value::<DateTime<Utc>>(self, FieldType::DateTime)?
                .naive_utc()
                .to_sql(ty, out),
            POSTGRES_TYPE_OID_TIMESTAMPTZ => {
                from_value::<DateTime<Utc>>(self, FieldType::DateTime)?.to_sql(ty, out)
            }
            POSTGRES_TYPE_OID_JSON | POSTGRES_TYPE_OID_JSONB => {
                from_value::<serde_json::Value>(self, FieldType::Json)?.to_sql(ty, out)
            }
            POSTGRES_TYPE_OID_BYTEA => from_value::<Vec<u8>>(self, FieldType::Blob)?.to_sql(ty, out),
            POSTGRES_TYPE_OID_TEXT
            | POSTGRES_TYPE_OID_VARCHAR
            | POSTGRES_TYPE_OID_BPCHAR
            | POSTGRES_TYPE_OID_NAME => from_value::<String>(self, FieldType::Text)?.to_sql(ty, out),
            oid => Err(format!("Unsupported PostgreSQL parameter type OID: {oid}").into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// NUMERIC in the binary wire format: base-10000 digit groups with a weight and display scale
fn decode_numeric(raw: &[u8]) -> std::result::Result<Decimal, BoxError> {
    if raw.len() < 8 {
        return Err("truncated NUMERIC header".into());
    }
    let mut buf = raw;
    let ndigits = buf.get_i16();
    let weight = buf.get_i16() as i32;
    let sign = buf.get_u16();
    let dscale = buf.get_u16() as u32;

    if sign == NUMERIC_NAN {
        return Err("NUMERIC NaN cannot be represented as a decimal".into());
    }
    if ndigits < 0 || buf.remaining() < ndigits as usize * 2 {
        return Err("truncated NUMERIC digits".into());
    }
    if ndigits == 0 {
        return Ok(Decimal::new(0, dscale)?);
    }

    let overflow = || -> BoxError { "NUMERIC value exceeds decimal precision".into() };
    let mut mantissa: i128 = 0;
    for _ in 0..ndigits {
        let digit = buf.get_i16() as i128;
        mantissa = mantissa
            .checked_mul(NBASE as i128)
            .and_then(|m| m.checked_add(digit))
            .ok_or_else(overflow)?;
    }

    // mantissa currently counts units of 10000^(weight - ndigits + 1)
    let shift = 4 * (weight - (ndigits as i32 - 1)) + dscale as i32;
    if shift >= 0 {
        let factor = 10i128.checked_pow(shift as u32).ok_or_else(overflow)?;
        mantissa = mantissa.checked_mul(factor).ok_or_else(overflow)?;
    } else {
        let divisor = 10i128.checked_pow((-shift) as u32).ok_or_else(overflow)?;
        mantissa /= divisor;
    }
    if sign == NUMERIC_NEG {
        mantissa = -mantissa;
    }
    Ok(Decimal::new(mantissa, dscale)?)
}

fn encode_numeric(value: &Decimal, out: &mut BytesMut) -> std::result::Result<(), BoxError> {
    let scale = value.scale();
    let pad = (4 - scale % 4) % 4;
    let mut magnitude = value
        .mantissa()
        .unsigned_abs()
        .checked_mul(10u128.pow(pad))
        .ok_or("decimal too large for NUMERIC encoding")?;
    let fraction_groups = ((scale + pad) / 4) as i16;

    let mut digits = Vec::new();
    while magnitude > 0 {
        digits.push((magnitude % NBASE) as i16);
        magnitude /= NBASE;
    }
    digits.reverse();
    let weight = if digits.is_empty() {
        0
    } else {
        digits.len() as i16 - fraction_groups - 1
    };
    while digits.last() == Some(&0) {
        digits.pop();
    }

    out.put_i16(digits.len() as i16);
    out.put_i16(weight);
    out.put_u16(if value.is_negative() { NUMERIC_NEG } else { NUMERIC_POS });
    out.put_u16(scale as u16);
    for digit in digits {
        out.put_i16(digit);
    }
    Ok(())
}

impl<'a> FromSql<'a> for Decimal {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        decode_numeric(raw)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl ToSql for Decimal {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        encode_numeric(self, out)?;
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        SqlFnError::new_driver("DataError", format!("column {idx}: {e}"))
    })
}

/// Convert one column using OID-based detection
fn column_value(row: &tokio_postgres::Row, idx: usize, column_type: &Type) -> Result<SqlValue> {
    let value = match column_type.oid() {
        POSTGRES_TYPE_OID_BOOL => get::<bool>(row, idx)?.map(SqlValue::Boolean),
        POSTGRES_TYPE_OID_INT2 => get::<i16>(row, idx)?.map(|v| SqlValue::Integer(v.into())),
        POSTGRES_TYPE_OID_INT4 => get::<i32>(row, idx)?.map(|v| SqlValue::Integer(v.into())),
        POSTGRES_TYPE_OID_INT8 => get::<i64>(row, idx)?.map(SqlValue::Integer),
        POSTGRES_TYPE_OID_FLOAT4 => get::<f32>(row, idx)?.map(|v| SqlValue::Float(v.into())),
        POSTGRES_TYPE_OID_FLOAT8 => get::<f64>(row, idx)?.map(SqlValue::Float),
        POSTGRES_TYPE_OID_TEXT
        | POSTGRES_TYPE_OID_VARCHAR
        | POSTGRES_TYPE_OID_BPCHAR
        | POSTGRES_TYPE_OID_NAME => get::<String>(row, idx)?.map(SqlValue::Text),
        POSTGRES_TYPE_OID_BYTEA => get::<Vec<u8>>(row, idx)?.map(SqlValue::Blob),
        POSTGRES_TYPE_OID_JSON | POSTGRES_TYPE_OID_JSONB => {
            get::<serde_json::Value>(row, idx)?.map(SqlValue::Json)
        }
        POSTGRES_TYPE_OID_NUMERIC => get::<Decimal>(row, idx)?.map(SqlValue::Decimal),
        POSTGRES_TYPE_OID_DATE => get::<NaiveDate>(row, idx)?.map(SqlValue::Date),
        POSTGRES_TYPE_OID_TIMESTAMP => get::<NaiveDateTime>(row, idx)?
            .map(|dt| SqlValue::DateTime(dt.and_utc().fixed_offset())),
        POSTGRES_TYPE_OID_TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?
            .map(|dt| SqlValue::DateTime(dt.fixed_offset())),
        oid => {
            return Err(SqlFnError::new_driver(
                "NotSupportedError",
                format!("Unsupported PostgreSQL type OID: {oid}"),
            ));
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn column_names(row: &tokio_postgres::Row) -> Arc<[String]> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

/// Convert a tokio-postgres row into a uniform [`Row`]
pub fn row_values(row: &tokio_postgres::Row, names: &Arc<[String]>) -> Result<Row> {
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| column_value(row, idx, column.type_()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::named(names.clone(), values))
}

/// A prepared server-side statement with its bound values
///
/// Wrapped functions return it inside a [`crate::NativeQuery`] to skip SQL text handling.
#[derive(Debug, Clone)]
pub struct PgStatement {
    pub statement: tokio_postgres::Statement,
    pub params: Vec<SqlValue>,
}

enum Target<'q> {
    Text(String),
    Prepared(&'q tokio_postgres::Statement),
}

/// Resolve a query description into a statement target and `$n`-ordered values
fn positional(query: &QueryDescription) -> Result<(Target<'_>, Vec<SqlValue>)> {
    match query {
        QueryDescription::Text(statement) => {
            let sql = statement
                .sql()
                .ok_or_else(|| SqlFnError::new_configuration("statement has no SQL text"))?;
            match &statement.params {
                Params::None => {
                    if let Some(name) = str_utils::extract_parameters(sql).into_iter().next() {
                        return Err(SqlFnError::new_parameter_not_provided(name));
                    }
                    Ok((Target::Text(sql.to_string()), Vec::new()))
                }
                Params::Positional(values) => Ok((Target::Text(sql.to_string()), values.clone())),
                Params::Named(values) => {
                    let (rewritten, ordered) = str_utils::rewrite_to_numbered(sql, values)?;
                    Ok((Target::Text(rewritten), ordered))
                }
            }
        }
        QueryDescription::Native(native) => match native.downcast_ref::<PgStatement>() {
            Some(prepared) => Ok((Target::Prepared(&prepared.statement), prepared.params.clone())),
            None => Err(SqlFnError::new_driver(
                "NotSupportedError",
                "the PostgreSQL adapter only runs text statements and PgStatement",
            )),
        },
    }
}

/// Live cursor over a server-side row stream
pub struct PgCursor {
    stream: Pin<Box<RowStream>>,
    names: Option<Arc<[String]>>,
}

impl PgCursor {
    fn new(stream: RowStream) -> Self {
        PgCursor {
            stream: Box::pin(stream),
            names: None,
        }
    }
}

#[async_trait]
impl AsyncCursor for PgCursor {
    async fn fetch_one(&mut self) -> Result<Option<Row>> {
        match self.stream.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(driver_error(e)),
            Some(Ok(row)) => {
                let names = self.names.get_or_insert_with(|| column_names(&row)).clone();
                Ok(Some(row_values(&row, &names)?))
            }
        }
    }
}

// Both collaborators go through `query_raw`, differing only in the receiver
macro_rules! impl_async_connection {
    ($($ty:ty),+) => {
        $(
            impl Capabilities for $ty {}

            #[async_trait]
            impl AsyncConnection for $ty {
                type Cursor = PgCursor;

                async fn execute(&mut self, query: &QueryDescription) -> Result<PgCursor> {
                    let (target, values) = positional(query)?;
                    let params = values.iter();
                    let stream = match target {
                        Target::Text(sql) => self.query_raw(sql.as_str(), params).await,
                        Target::Prepared(statement) => self.query_raw(statement, params).await,
                    }
                    .map_err(driver_error)?;
                    Ok(PgCursor::new(stream))
                }
            }
        )+
    };
}

impl_async_connection!(Client, Transaction<'_>);
