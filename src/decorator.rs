//! Decorator factory: turn a parameter-producing function into a SQL executor
//!
//! ```ignore
//! let get_user = sql_one_or_none::<User>()
//!     .sql("SELECT id, name FROM users WHERE id = @id")
//!     .wrap(|id: i64| Statement::params(named_params! { "id" => id }));
//!
//! let user = get_user.call(&mut conn, 1)?;
//! ```
//!
//! The body may also return [`Prepared::Cancelled`] to skip the database and
//! get the shape's default result.

use crate::{
    config::Settings,
    connection::{AsyncConnection, AsyncCursor, Capabilities, Connection, Cursor},
    query::{IntoPrepared, Prepared, QueryDescription},
    record::{FromRecord, RecordType},
    registry::{CallGuard, Registry, get_registry},
    result::{Result, SqlFnError},
    strategy::{
        Execute, FetchAll, FetchScalars, IterStrategy, Iterate, IterateScalars, OneOrNone,
        ResultShape, ScalarOrNone, Strategy, fetch, fetch_async,
    },
    value::FromValue,
};
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

/// Wrap a function whose rows are all mapped into `T`
pub fn sql_fetch_all<T: FromRecord>() -> Decorator<FetchAll<T>> {
    Decorator::new()
}

/// Wrap a function returning at most one row mapped into `T`
pub fn sql_one_or_none<T: FromRecord>() -> Decorator<OneOrNone<T>> {
    Decorator::new()
}

/// Wrap a function returning the first column of at most one row
pub fn sql_scalar_or_none<T: FromValue>() -> Decorator<ScalarOrNone<T>> {
    Decorator::new()
}

/// Wrap a function returning the first column of every row
pub fn sql_fetch_scalars<T: FromValue>() -> Decorator<FetchScalars<T>> {
    Decorator::new()
}

/// Wrap a function whose statement is run for its side effects only
pub fn sql_execute() -> Decorator<Execute> {
    Decorator::new()
}

/// Wrap a function whose rows are handed out lazily, mapped into `T`
///
/// Fails with `ConfigurationError` when the collaborator `C` has no native cursor.
pub fn sql_iterate<T: FromRecord, C: Capabilities>() -> Result<IterDecorator<Iterate<T>, C>> {
    IterDecorator::new()
}

/// Wrap a function whose first-column values are handed out lazily
///
/// Fails with `ConfigurationError` when the collaborator `C` has no native cursor.
pub fn sql_iterate_scalars<T: FromValue, C: Capabilities>()
-> Result<IterDecorator<IterateScalars<T>, C>> {
    IterDecorator::new()
}

/// Qualified name of a wrapped function: its type path without closure markers
///
/// Closures share the path of their enclosing function, so their names also
/// carry the `file:line:col` where they were wrapped.
fn qualified_name<F>(caller: &Location<'_>) -> String {
    let path = std::any::type_name::<F>();
    let mut name = path;
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    if name.len() == path.len() {
        name.to_string()
    } else {
        format!("{name}@{}:{}:{}", caller.file(), caller.line(), caller.column())
    }
}

/// Options shared by bulk and iterating decorators
#[derive(Debug, Clone, Default)]
struct Options {
    sql: Option<String>,
    name: Option<String>,
    record_type: Option<RecordType>,
    registry: Option<Registry>,
}

impl Options {
    fn name_for<F>(&self, caller: &Location<'_>) -> Arc<str> {
        Arc::from(
            self.name
                .clone()
                .unwrap_or_else(|| qualified_name::<F>(caller)),
        )
    }

    fn registry(&self) -> Registry {
        self.registry.clone().unwrap_or_else(|| get_registry().clone())
    }
}

/// Builder for a bulk-shape wrapped function
pub struct Decorator<S> {
    options: Options,
    strict: Option<bool>,
    settings_strict: bool,
    _strategy: PhantomData<fn() -> S>,
}

impl<S: Strategy> Decorator<S> {
    fn new() -> Self {
        Decorator {
            options: Options::default(),
            strict: None,
            settings_strict: false,
            _strategy: PhantomData,
        }
    }

    /// Default SQL, used when the body returns parameters only
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.options.sql = Some(sql.into());
        self
    }

    /// Name the function is recorded under instead of its type path
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Reject a second row in one-or-none shapes instead of ignoring it
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Map rows into this record type instead of the one declared by `T`
    pub fn record_type(mut self, record_type: RecordType) -> Self {
        self.options.record_type = Some(record_type);
        self
    }

    /// Record statistics into `registry` instead of the global one
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.options.registry = Some(registry.clone());
        self
    }

    /// Take defaults from loaded settings; explicit builder calls win
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.settings_strict = settings.strict_one_or_none;
        self
    }

    /// Use a named query of the settings: its SQL, name and declared record type
    pub fn query(mut self, settings: &Settings, name: &str) -> Result<Self> {
        let spec = settings.query(name)?;
        self.options.sql = Some(spec.sql.clone());
        if self.options.name.is_none() {
            self.options.name = Some(name.to_string());
        }
        if let Some(returns) = &spec.returns {
            self.options.record_type = Some(returns.clone());
        }
        Ok(self.settings(settings))
    }

    #[track_caller]
    pub fn wrap<A, R, F>(self, func: F) -> SqlFn<S, F>
    where
        F: Fn(A) -> R,
        R: IntoPrepared,
    {
        let name = self.options.name_for::<F>(Location::caller());
        let registry = self.options.registry();
        registry.register(&name);
        tracing::debug!(func = %name, shape = %S::SHAPE, "wrapped sql function");

        SqlFn {
            func,
            name,
            sql: self.options.sql,
            record_type: self.options.record_type.unwrap_or_else(S::record_type),
            strict: self.strict.unwrap_or(self.settings_strict),
            registry,
            _strategy: PhantomData,
        }
    }
}

/// Outcome of running the wrapped body
enum Step {
    Run(QueryDescription),
    Cancelled,
}

fn prepare<R: IntoPrepared>(body: R, default_sql: Option<&str>, name: &str) -> Result<Step> {
    match body.into_prepared()? {
        Prepared::Cancelled => Ok(Step::Cancelled),
        Prepared::Proceed(query) => Ok(Step::Run(query.resolve(default_sql, name)?)),
    }
}

/// A wrapped function with a bulk result shape
pub struct SqlFn<S, F> {
    func: F,
    name: Arc<str>,
    sql: Option<String>,
    record_type: RecordType,
    strict: bool,
    registry: Registry,
    _strategy: PhantomData<fn() -> S>,
}

impl<S: Strategy, F> SqlFn<S, F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> ResultShape {
        S::SHAPE
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Call the original function without a connection or statistics
    pub fn unwrapped<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        (self.func)(args)
    }

    /// Run the wrapped function against a synchronous connection
    pub fn call<C, A, R>(&self, conn: &mut C, args: A) -> Result<S::Output>
    where
        C: Connection,
        F: Fn(A) -> R,
        R: IntoPrepared,
    {
        let guard = CallGuard::start(self.registry.clone(), self.name.clone(), S::SHAPE);
        let step = prepare((self.func)(args), self.sql.as_deref(), &self.name);
        let result = match step {
            Ok(Step::Cancelled) => {
                guard.cancelled();
                return Ok(S::cancelled());
            }
            Ok(Step::Run(query)) => self.run(conn, &query),
            Err(e) => Err(e),
        };
        finish(guard, result)
    }

    fn run<C: Connection>(&self, conn: &mut C, query: &QueryDescription) -> Result<(S::Output, u64)> {
        let mut cursor = conn.execute(query)?;
        let fetched = fetch(&mut cursor, S::plan(self.strict), &self.name)?;
        S::shape(fetched, &self.record_type)
    }

    /// Run the wrapped function against an asynchronous connection
    ///
    /// Dropping the returned future before it completes records the call as
    /// failed with kind `cancelled`.
    pub async fn call_async<C, A, R>(&self, conn: &mut C, args: A) -> Result<S::Output>
    where
        C: AsyncConnection,
        F: Fn(A) -> R,
        R: IntoPrepared,
    {
        let guard = CallGuard::start(self.registry.clone(), self.name.clone(), S::SHAPE);
        let step = prepare((self.func)(args), self.sql.as_deref(), &self.name);
        let result = match step {
            Ok(Step::Cancelled) => {
                guard.cancelled();
                return Ok(S::cancelled());
            }
            Ok(Step::Run(query)) => self.run_async(conn, &query).await,
            Err(e) => Err(e),
        };
        finish(guard, result)
    }

    async fn run_async<C: AsyncConnection>(
        &self,
        conn: &mut C,
        query: &QueryDescription,
    ) -> Result<(S::Output, u64)> {
        let mut cursor = conn.execute(query).await?;
        let fetched = fetch_async(&mut cursor, S::plan(self.strict), &self.name).await?;
        S::shape(fetched, &self.record_type)
    }
}

fn finish<T>(guard: CallGuard, result: Result<(T, u64)>) -> Result<T> {
    match result {
        Ok((output, tuples)) => {
            guard.success(tuples);
            Ok(output)
        }
        Err(e) => {
            guard.failure(&e);
            Err(e)
        }
    }
}

/// Builder for an iterating wrapped function bound to collaborator type `C`
pub struct IterDecorator<S, C> {
    options: Options,
    _strategy: PhantomData<fn() -> (S, C)>,
}

impl<S: IterStrategy, C: Capabilities> IterDecorator<S, C> {
    fn new() -> Result<Self> {
        if !C::NATIVE_CURSOR {
            return Err(SqlFnError::new_configuration(format!(
                "{} needs a native cursor, which {} does not provide",
                S::SHAPE,
                std::any::type_name::<C>()
            )));
        }
        Ok(IterDecorator {
            options: Options::default(),
            _strategy: PhantomData,
        })
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.options.sql = Some(sql.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn record_type(mut self, record_type: RecordType) -> Self {
        self.options.record_type = Some(record_type);
        self
    }

    pub fn registry(mut self, registry: &Registry) -> Self {
        self.options.registry = Some(registry.clone());
        self
    }

    #[track_caller]
    pub fn wrap<A, R, F>(self, func: F) -> SqlIterFn<S, F, C>
    where
        F: Fn(A) -> R,
        R: IntoPrepared,
    {
        let name = self.options.name_for::<F>(Location::caller());
        let registry = self.options.registry();
        registry.register(&name);
        tracing::debug!(func = %name, shape = %S::SHAPE, "wrapped sql function");

        SqlIterFn {
            func,
            name,
            sql: self.options.sql,
            record_type: self.options.record_type.unwrap_or_else(S::record_type),
            registry,
            _strategy: PhantomData,
        }
    }
}

/// A wrapped function handing out its rows lazily
///
/// Statistics are finalized when the first row is extracted, so `tuples`
/// stays zero and the recorded duration covers execution only.
pub struct SqlIterFn<S, F, C> {
    func: F,
    name: Arc<str>,
    sql: Option<String>,
    record_type: RecordType,
    registry: Registry,
    _strategy: PhantomData<fn() -> (S, C)>,
}

impl<S: IterStrategy, F, C> SqlIterFn<S, F, C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> ResultShape {
        S::SHAPE
    }

    pub fn unwrapped<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        (self.func)(args)
    }

    /// Execute and hand out a single-pass iterator over the rows
    pub fn call<'c, A, R>(&self, conn: &'c mut C, args: A) -> Result<RowIter<S, <C as Connection>::Cursor<'c>>>
    where
        C: Connection,
        F: Fn(A) -> R,
        R: IntoPrepared,
    {
        let guard = CallGuard::start(self.registry.clone(), self.name.clone(), S::SHAPE);
        let query = match prepare((self.func)(args), self.sql.as_deref(), &self.name) {
            Ok(Step::Run(query)) => query,
            Ok(Step::Cancelled) => {
                guard.cancelled();
                return Ok(RowIter::empty(self.record_type.clone()));
            }
            Err(e) => {
                guard.failure(&e);
                return Err(e);
            }
        };
        match conn.execute(&query) {
            Ok(cursor) => Ok(RowIter::new(cursor, guard, self.record_type.clone())),
            Err(e) => {
                guard.failure(&e);
                Err(e)
            }
        }
    }

    /// Execute and hand out an asynchronous single-pass sequence over the rows
    pub async fn call_async<A, R>(&self, conn: &mut C, args: A) -> Result<AsyncRowIter<S, <C as AsyncConnection>::Cursor>>
    where
        C: AsyncConnection,
        F: Fn(A) -> R,
        R: IntoPrepared,
    {
        let guard = CallGuard::start(self.registry.clone(), self.name.clone(), S::SHAPE);
        let query = match prepare((self.func)(args), self.sql.as_deref(), &self.name) {
            Ok(Step::Run(query)) => query,
            Ok(Step::Cancelled) => {
                guard.cancelled();
                return Ok(AsyncRowIter::empty(self.record_type.clone()));
            }
            Err(e) => {
                guard.failure(&e);
                return Err(e);
            }
        };
        match conn.execute(&query).await {
            Ok(cursor) => Ok(AsyncRowIter::new(cursor, guard, self.record_type.clone())),
            Err(e) => {
                guard.failure(&e);
                Err(e)
            }
        }
    }
}

/// Lazy state shared by the sync and async row sequences
struct Pending<S, K> {
    cursor: Option<K>,
    guard: Option<CallGuard>,
    record_type: RecordType,
    _strategy: PhantomData<fn() -> S>,
}

impl<S: IterStrategy, K> Pending<S, K> {
    fn new(cursor: Option<K>, guard: Option<CallGuard>, record_type: RecordType) -> Self {
        Pending {
            cursor,
            guard,
            record_type,
            _strategy: PhantomData,
        }
    }

    /// Turn one fetch result into the next item, finalizing statistics on first use
    fn advance(&mut self, fetched: Result<Option<crate::row::Row>>) -> Option<Result<S::Item>> {
        match fetched {
            Ok(Some(row)) => {
                let item = S::extract(row, &self.record_type);
                if let Some(guard) = self.guard.take() {
                    match &item {
                        Ok(_) => guard.success(0),
                        Err(e) => guard.failure(e),
                    }
                }
                Some(item)
            }
            Ok(None) => {
                self.cursor = None;
                if let Some(guard) = self.guard.take() {
                    guard.success(0);
                }
                None
            }
            Err(e) => {
                self.cursor = None;
                if let Some(guard) = self.guard.take() {
                    guard.failure(&e);
                }
                Some(Err(e))
            }
        }
    }
}

/// Single-pass iterator over the rows of an iterating wrapped function
pub struct RowIter<S, K> {
    pending: Pending<S, K>,
}

impl<S: IterStrategy, K: Cursor> RowIter<S, K> {
    fn new(cursor: K, guard: CallGuard, record_type: RecordType) -> Self {
        RowIter {
            pending: Pending::new(Some(cursor), Some(guard), record_type),
        }
    }

    fn empty(record_type: RecordType) -> Self {
        RowIter {
            pending: Pending::new(None, None, record_type),
        }
    }
}

impl<S: IterStrategy, K: Cursor> Iterator for RowIter<S, K> {
    type Item = Result<S::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let fetched = self.pending.cursor.as_mut()?.fetch_one();
        self.pending.advance(fetched)
    }
}

/// Asynchronous single-pass sequence over the rows of an iterating wrapped function
pub struct AsyncRowIter<S, K> {
    pending: Pending<S, K>,
}

impl<S: IterStrategy, K: AsyncCursor> AsyncRowIter<S, K> {
    fn new(cursor: K, guard: CallGuard, record_type: RecordType) -> Self {
        AsyncRowIter {
            pending: Pending::new(Some(cursor), Some(guard), record_type),
        }
    }

    fn empty(record_type: RecordType) -> Self {
        AsyncRowIter {
            pending: Pending::new(None, None, record_type),
        }
    }

    pub async fn next(&mut self) -> Option<Result<S::Item>> {
        let fetched = self.pending.cursor.as_mut()?.fetch_one().await;
        self.pending.advance(fetched)
    }

    /// Drain the remaining rows, stopping at the first error
    pub async fn try_collect(mut self) -> Result<Vec<S::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() {}

    #[track_caller]
    fn name_of<F>(_: &F) -> String {
        qualified_name::<F>(Location::caller())
    }

    #[test]
    fn test_qualified_name_of_fn_item() {
        assert_eq!(name_of(&body), "sqlfn::decorator::tests::body");
    }

    #[test]
    fn test_qualified_name_of_closure_carries_location() {
        let closure = |_: i64| ();
        let line = line!() + 1;
        let name = name_of(&closure);
        assert_eq!(
            name,
            format!(
                "sqlfn::decorator::tests::test_qualified_name_of_closure_carries_location@{}:{line}:20",
                file!()
            )
        );
    }

    #[test]
    fn test_closures_in_one_function_get_distinct_names() {
        let first = |_: i64| ();
        let second = |_: i64| ();
        assert_ne!(name_of(&first), name_of(&second));
    }
}
