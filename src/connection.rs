//! Contract a driver adapter implements so wrapped functions can run against it
//!
//! The runtime borrows a connection for one call and never pools, retries or
//! reconnects. Adapters convert their native rows into [`Row`] (the
//! "row values" step) before handing them out.

use crate::{query::QueryDescription, result::Result, row::Row};
use async_trait::async_trait;

/// Static capabilities of a collaborator, checked when a function is decorated
pub trait Capabilities {
    /// Whether rows can be pulled one at a time from a live server-side cursor.
    /// Iterate shapes are only available when this is true.
    const NATIVE_CURSOR: bool = true;
}

/// Synchronous collaborator: a connection, session or transaction
pub trait Connection: Capabilities {
    type Cursor<'c>: Cursor
    where
        Self: 'c;

    fn execute<'c>(&'c mut self, query: &QueryDescription) -> Result<Self::Cursor<'c>>;
}

/// Forward-only handle over the rows of one executed query
pub trait Cursor {
    /// Next row, or `None` at the end
    fn fetch_one(&mut self) -> Result<Option<Row>>;

    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Asynchronous collaborator; awaiting `execute` and `fetch_one` are the suspension points
#[async_trait]
pub trait AsyncConnection: Capabilities + Send {
    type Cursor: AsyncCursor;

    async fn execute(&mut self, query: &QueryDescription) -> Result<Self::Cursor>;
}

#[async_trait]
pub trait AsyncCursor: Send {
    async fn fetch_one(&mut self) -> Result<Option<Row>>;

    async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Cursor over rows that were already read in full at execute time
///
/// Adapters without a native cursor hand this out.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    rows: std::collections::VecDeque<Row>,
}

impl BufferedCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        BufferedCursor { rows: rows.into() }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Cursor for BufferedCursor {
    fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        Ok(self.rows.drain(..).collect())
    }
}

#[async_trait]
impl AsyncCursor for BufferedCursor {
    async fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        Ok(self.rows.drain(..).collect())
    }
}
