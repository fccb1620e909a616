//! Result shapes and how each one drives a cursor
//!
//! Fetching rows (sync or async) is kept apart from shaping them, so both call
//! conventions share one implementation of every shape.

use crate::{
    connection::{AsyncCursor, Cursor},
    mapper::{map_scalar, record_from_row, scalar_from_row},
    record::{FromRecord, RecordType},
    result::{Result, SqlFnError},
    row::Row,
    value::FromValue,
};
use std::fmt;
use std::marker::PhantomData;

/// The seven ways a wrapped function can return its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    FetchAll,
    OneOrNone,
    ScalarOrNone,
    FetchScalars,
    Execute,
    Iterate,
    IterateScalars,
}

impl ResultShape {
    pub fn name(&self) -> &'static str {
        match self {
            ResultShape::FetchAll => "fetch_all",
            ResultShape::OneOrNone => "one_or_none",
            ResultShape::ScalarOrNone => "scalar_or_none",
            ResultShape::FetchScalars => "fetch_scalars",
            ResultShape::Execute => "execute",
            ResultShape::Iterate => "iterate",
            ResultShape::IterateScalars => "iterate_scalars",
        }
    }

    /// Iterating shapes hand out a lazy sequence and always count zero tuples
    pub fn is_iterating(&self) -> bool {
        matches!(self, ResultShape::Iterate | ResultShape::IterateScalars)
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How many rows a bulk shape pulls from the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    All,
    /// First row only; `strict` also probes for a second row and rejects it
    AtMostOne { strict: bool },
    /// Exhaust the cursor and discard every row
    Drain,
}

/// Rows pulled according to a [`FetchPlan`]
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    All(Vec<Row>),
    One(Option<Row>),
    Nothing,
}

impl Fetched {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Fetched::All(rows) => rows,
            Fetched::One(row) => row.into_iter().collect(),
            Fetched::Nothing => Vec::new(),
        }
    }
}

/// Pull rows from a synchronous cursor
pub fn fetch<K: Cursor>(cursor: &mut K, plan: FetchPlan, func_name: &str) -> Result<Fetched> {
    match plan {
        FetchPlan::All => Ok(Fetched::All(cursor.fetch_all()?)),
        FetchPlan::AtMostOne { strict } => {
            let first = cursor.fetch_one()?;
            if strict && first.is_some() && cursor.fetch_one()?.is_some() {
                return Err(SqlFnError::new_too_many_rows(func_name));
            }
            Ok(Fetched::One(first))
        }
        FetchPlan::Drain => {
            cursor.fetch_all()?;
            Ok(Fetched::Nothing)
        }
    }
}

/// Pull rows from an asynchronous cursor
pub async fn fetch_async<K: AsyncCursor>(
    cursor: &mut K,
    plan: FetchPlan,
    func_name: &str,
) -> Result<Fetched> {
    match plan {
        FetchPlan::All => Ok(Fetched::All(cursor.fetch_all().await?)),
        FetchPlan::AtMostOne { strict } => {
            let first = cursor.fetch_one().await?;
            if strict && first.is_some() && cursor.fetch_one().await?.is_some() {
                return Err(SqlFnError::new_too_many_rows(func_name));
            }
            Ok(Fetched::One(first))
        }
        FetchPlan::Drain => {
            cursor.fetch_all().await?;
            Ok(Fetched::Nothing)
        }
    }
}

/// A bulk result shape: fetch plan, cancellation default and row shaping
pub trait Strategy {
    type Output;

    const SHAPE: ResultShape;

    fn plan(strict: bool) -> FetchPlan;

    /// Result returned when the wrapped body cancelled the call
    fn cancelled() -> Self::Output;

    /// Record type used when the decorator was not given one
    fn record_type() -> RecordType;

    /// Shape the fetched rows; returns the output and the tuple count
    fn shape(fetched: Fetched, record_type: &RecordType) -> Result<(Self::Output, u64)>;
}

/// Every row mapped into `T`
pub struct FetchAll<T>(PhantomData<fn() -> T>);

/// First row mapped into `T`, if any
pub struct OneOrNone<T>(PhantomData<fn() -> T>);

/// First column of the first row; NULL reads as `None`
pub struct ScalarOrNone<T>(PhantomData<fn() -> T>);

/// First column of every row
pub struct FetchScalars<T>(PhantomData<fn() -> T>);

/// Run the statement and discard any rows
pub struct Execute;

fn scalar_record_type<T>() -> RecordType {
    RecordType::open(std::any::type_name::<T>())
}

impl<T: FromRecord> Strategy for FetchAll<T> {
    type Output = Vec<T>;

    const SHAPE: ResultShape = ResultShape::FetchAll;

    fn plan(_strict: bool) -> FetchPlan {
        FetchPlan::All
    }

    fn cancelled() -> Self::Output {
        Vec::new()
    }

    fn record_type() -> RecordType {
        T::record_type()
    }

    fn shape(fetched: Fetched, record_type: &RecordType) -> Result<(Self::Output, u64)> {
        let rows = fetched.into_rows();
        let tuples = rows.len() as u64;
        let records = rows
            .into_iter()
            .map(|row| record_from_row(row, record_type))
            .collect::<Result<Vec<T>>>()?;
        Ok((records, tuples))
    }
}

impl<T: FromRecord> Strategy for OneOrNone<T> {
    type Output = Option<T>;

    const SHAPE: ResultShape = ResultShape::OneOrNone;

    fn plan(strict: bool) -> FetchPlan {
        FetchPlan::AtMostOne { strict }
    }

    fn cancelled() -> Self::Output {
        None
    }

    fn record_type() -> RecordType {
        T::record_type()
    }

    fn shape(fetched: Fetched, record_type: &RecordType) -> Result<(Self::Output, u64)> {
        match fetched.into_rows().into_iter().next() {
            Some(row) => Ok((Some(record_from_row(row, record_type)?), 1)),
            None => Ok((None, 0)),
        }
    }
}

impl<T: FromValue> Strategy for ScalarOrNone<T> {
    type Output = Option<T>;

    const SHAPE: ResultShape = ResultShape::ScalarOrNone;

    fn plan(strict: bool) -> FetchPlan {
        FetchPlan::AtMostOne { strict }
    }

    fn cancelled() -> Self::Output {
        None
    }

    fn record_type() -> RecordType {
        scalar_record_type::<T>()
    }

    fn shape(fetched: Fetched, _record_type: &RecordType) -> Result<(Self::Output, u64)> {
        let Some(row) = fetched.into_rows().into_iter().next() else {
            return Ok((None, 0));
        };
        let column = row.column_name(0);
        let value = map_scalar(row, T::field_type())?;
        if value.is_null() {
            return Ok((None, 1));
        }
        let scalar = T::from_value(value).map_err(|e| e.with_field(&column))?;
        Ok((Some(scalar), 1))
    }
}

impl<T: FromValue> Strategy for FetchScalars<T> {
    type Output = Vec<T>;

    const SHAPE: ResultShape = ResultShape::FetchScalars;

    fn plan(_strict: bool) -> FetchPlan {
        FetchPlan::All
    }

    fn cancelled() -> Self::Output {
        Vec::new()
    }

    fn record_type() -> RecordType {
        scalar_record_type::<T>()
    }

    fn shape(fetched: Fetched, _record_type: &RecordType) -> Result<(Self::Output, u64)> {
        let rows = fetched.into_rows();
        let tuples = rows.len() as u64;
        let scalars = rows
            .into_iter()
            .map(scalar_from_row)
            .collect::<Result<Vec<T>>>()?;
        Ok((scalars, tuples))
    }
}

impl Strategy for Execute {
    type Output = ();

    const SHAPE: ResultShape = ResultShape::Execute;

    fn plan(_strict: bool) -> FetchPlan {
        FetchPlan::Drain
    }

    fn cancelled() -> Self::Output {}

    fn record_type() -> RecordType {
        RecordType::open("Execute")
    }

    fn shape(_fetched: Fetched, _record_type: &RecordType) -> Result<(Self::Output, u64)> {
        Ok(((), 0))
    }
}

/// A lazy result shape: rows are extracted one at a time by the consumer
pub trait IterStrategy {
    type Item;

    const SHAPE: ResultShape;

    fn record_type() -> RecordType;

    fn extract(row: Row, record_type: &RecordType) -> Result<Self::Item>;
}

/// Rows mapped into `T`, one at a time
pub struct Iterate<T>(PhantomData<fn() -> T>);

/// First column of each row, one at a time
pub struct IterateScalars<T>(PhantomData<fn() -> T>);

impl<T: FromRecord> IterStrategy for Iterate<T> {
    type Item = T;

    const SHAPE: ResultShape = ResultShape::Iterate;

    fn record_type() -> RecordType {
        T::record_type()
    }

    fn extract(row: Row, record_type: &RecordType) -> Result<T> {
        record_from_row(row, record_type)
    }
}

impl<T: FromValue> IterStrategy for IterateScalars<T> {
    type Item = T;

    const SHAPE: ResultShape = ResultShape::IterateScalars;

    fn record_type() -> RecordType {
        scalar_record_type::<T>()
    }

    fn extract(row: Row, _record_type: &RecordType) -> Result<T> {
        scalar_from_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection::BufferedCursor, record::Record, value::SqlValue};
    use std::sync::Arc;

    fn rows(values: &[i64]) -> Vec<Row> {
        let names: Arc<[String]> = Arc::from(vec!["n".to_string()]);
        values
            .iter()
            .map(|v| Row::named(names.clone(), vec![SqlValue::Integer(*v)]))
            .collect()
    }

    #[test]
    fn test_lenient_one_or_none_takes_first_row() {
        let mut cursor = BufferedCursor::new(rows(&[1, 2]));
        let fetched = fetch(&mut cursor, FetchPlan::AtMostOne { strict: false }, "f").unwrap();
        let (record, tuples) =
            OneOrNone::<Record>::shape(fetched, &Record::record_type()).unwrap();
        assert_eq!(record.unwrap().get("n"), Some(&SqlValue::Integer(1)));
        assert_eq!(tuples, 1);
    }

    #[test]
    fn test_strict_one_or_none_rejects_second_row() {
        let mut cursor = BufferedCursor::new(rows(&[1, 2]));
        let err = fetch(&mut cursor, FetchPlan::AtMostOne { strict: true }, "users::get")
            .unwrap_err();
        assert!(matches!(err, SqlFnError::TooManyRows(ref name) if name == "users::get"));
        assert_eq!(err.error_kind(), "TooManyRowsError");
    }

    #[test]
    fn test_strict_one_or_none_accepts_single_row() {
        let mut cursor = BufferedCursor::new(rows(&[9]));
        let fetched = fetch(&mut cursor, FetchPlan::AtMostOne { strict: true }, "f").unwrap();
        assert_eq!(fetched.into_rows().len(), 1);
    }

    #[test]
    fn test_scalar_or_none_null_is_none_but_counts_row() {
        let row = Row::positional(vec![SqlValue::Null]);
        let (value, tuples) =
            ScalarOrNone::<i64>::shape(Fetched::One(Some(row)), &RecordType::open("s")).unwrap();
        assert_eq!(value, None);
        assert_eq!(tuples, 1);
    }

    #[test]
    fn test_fetch_scalars_counts_rows() {
        let (values, tuples) =
            FetchScalars::<i64>::shape(Fetched::All(rows(&[3, 4, 5])), &RecordType::open("s"))
                .unwrap();
        assert_eq!(values, vec![3, 4, 5]);
        assert_eq!(tuples, 3);
    }

    #[test]
    fn test_execute_drains_and_counts_nothing() {
        let mut cursor = BufferedCursor::new(rows(&[1, 2, 3]));
        let fetched = fetch(&mut cursor, Execute::plan(false), "f").unwrap();
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(Execute::shape(fetched, &Execute::record_type()).unwrap().1, 0);
    }

    #[test]
    fn test_shape_names() {
        assert_eq!(ResultShape::ScalarOrNone.to_string(), "scalar_or_none");
        assert!(ResultShape::IterateScalars.is_iterating());
        assert!(!ResultShape::FetchAll.is_iterating());
    }

    #[tokio::test]
    async fn test_fetch_async_all() {
        let mut cursor = BufferedCursor::new(rows(&[1, 2]));
        let fetched = fetch_async(&mut cursor, FetchPlan::All, "f").await.unwrap();
        assert_eq!(fetched.into_rows().len(), 2);
    }
}
