#![allow(dead_code)]

use async_trait::async_trait;
use sqlfn::{
    AsyncConnection, AsyncCursor, Capabilities, Connection, Cursor, FieldDef, FromRecord,
    QueryDescription, Record, RecordType, Result, Row, SqlFnError, SqlValue,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl FromRecord for User {
    fn record_type() -> RecordType {
        RecordType::new(
            "User",
            vec![FieldDef::of::<i64>("id"), FieldDef::of::<String>("name")],
        )
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(User {
            id: record.take("id")?,
            name: record.take("name")?,
        })
    }
}

pub fn user_rows(users: &[(i64, &str)]) -> Vec<Row> {
    let names: Arc<[String]> = Arc::from(vec!["id".to_string(), "name".to_string()]);
    users
        .iter()
        .map(|(id, name)| Row::named(names.clone(), vec![SqlValue::Integer(*id), SqlValue::from(*name)]))
        .collect()
}

pub fn scalar_rows(values: &[SqlValue]) -> Vec<Row> {
    let names: Arc<[String]> = Arc::from(vec!["value".to_string()]);
    values
        .iter()
        .map(|value| Row::named(names.clone(), vec![value.clone()]))
        .collect()
}

/// In-memory collaborator with a lazy cursor; counts every execute and fetch
#[derive(Clone, Default)]
pub struct MockConnection {
    rows: Vec<Row>,
    failure: Option<(String, String)>,
    stall: bool,
    executed: Arc<Mutex<Vec<QueryDescription>>>,
    fetched: Arc<AtomicUsize>,
}

impl MockConnection {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        MockConnection {
            rows,
            ..Default::default()
        }
    }

    /// Every execute fails with a driver error of `kind`
    pub fn failing(kind: &str) -> Self {
        MockConnection {
            failure: Some((kind.to_string(), format!("simulated {kind}"))),
            ..Default::default()
        }
    }

    /// Async fetches never complete
    pub fn stalled() -> Self {
        MockConnection {
            stall: true,
            ..Default::default()
        }
    }

    pub fn executions(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    pub fn executed_sql(&self) -> Vec<Option<String>> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.as_statement().and_then(|s| s.sql().map(str::to_string)))
            .collect()
    }

    pub fn last_query(&self) -> Option<QueryDescription> {
        self.executed.lock().unwrap().last().cloned()
    }

    pub fn fetches(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    fn open(&self, query: &QueryDescription) -> Result<MockCursor> {
        self.executed.lock().unwrap().push(query.clone());
        if let Some((kind, message)) = &self.failure {
            return Err(SqlFnError::new_driver(kind.clone(), message.clone()));
        }
        Ok(MockCursor {
            rows: self.rows.clone().into(),
            fetched: self.fetched.clone(),
            stall: self.stall,
        })
    }
}

pub struct MockCursor {
    rows: VecDeque<Row>,
    fetched: Arc<AtomicUsize>,
    stall: bool,
}

impl MockCursor {
    fn pop(&mut self) -> Option<Row> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        self.rows.pop_front()
    }
}

impl Cursor for MockCursor {
    fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.pop())
    }
}

#[async_trait]
impl AsyncCursor for MockCursor {
    async fn fetch_one(&mut self) -> Result<Option<Row>> {
        if self.stall {
            futures::future::pending::<()>().await;
        }
        Ok(self.pop())
    }
}

impl Capabilities for MockConnection {}

impl Connection for MockConnection {
    type Cursor<'c>
        = MockCursor
    where
        Self: 'c;

    fn execute<'c>(&'c mut self, query: &QueryDescription) -> Result<MockCursor> {
        self.open(query)
    }
}

#[async_trait]
impl AsyncConnection for MockConnection {
    type Cursor = MockCursor;

    async fn execute(&mut self, query: &QueryDescription) -> Result<MockCursor> {
        self.open(query)
    }
}
