use crate::{
    result::{Result, SqlFnError},
    value::SqlValue,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Bound values of a textual statement
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    /// Values for `?`/`$n` style placeholders, in order
    Positional(Vec<SqlValue>),
    /// Values for `@name` style placeholders
    Named(Vec<(String, SqlValue)>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }
}

/// SQL text plus bound parameters
///
/// A statement without SQL text borrows the default SQL given at decoration time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: Option<String>,
    pub params: Params,
}

impl Statement {
    /// Parameters only; the SQL comes from the decorator
    pub fn params(params: Params) -> Self {
        Statement { sql: None, params }
    }

    /// SQL only, no parameters
    pub fn query_only(sql: impl Into<String>) -> Self {
        Statement {
            sql: Some(sql.into()),
            params: Params::None,
        }
    }

    pub fn query_and_params(sql: impl Into<String>, params: Params) -> Self {
        Statement {
            sql: Some(sql.into()),
            params,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }
}

/// A backend-native composable query object, opaque to the runtime
///
/// Adapters that understand the wrapped type recover it with `downcast_ref`.
#[derive(Clone)]
pub struct NativeQuery(Arc<dyn Any + Send + Sync>);

impl NativeQuery {
    pub fn new<T: Any + Send + Sync>(query: T) -> Self {
        NativeQuery(Arc::new(query))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeQuery(..)")
    }
}

/// What a wrapped function body hands to the execution strategy
#[derive(Debug, Clone)]
pub enum QueryDescription {
    Text(Statement),
    Native(NativeQuery),
}

impl QueryDescription {
    /// Fill in the decorator's default SQL when the statement carries none
    pub(crate) fn resolve(self, default_sql: Option<&str>, func_name: &str) -> Result<Self> {
        match self {
            QueryDescription::Text(mut statement) => {
                if statement.sql.is_none() {
                    let sql =
                        default_sql.ok_or_else(|| SqlFnError::new_missing_statement(func_name))?;
                    statement.sql = Some(sql.to_string());
                }
                Ok(QueryDescription::Text(statement))
            }
            native => Ok(native),
        }
    }

    pub fn as_statement(&self) -> Option<&Statement> {
        match self {
            QueryDescription::Text(statement) => Some(statement),
            QueryDescription::Native(_) => None,
        }
    }
}

impl From<Statement> for QueryDescription {
    fn from(statement: Statement) -> Self {
        QueryDescription::Text(statement)
    }
}

impl From<NativeQuery> for QueryDescription {
    fn from(native: NativeQuery) -> Self {
        QueryDescription::Native(native)
    }
}

/// Outcome of a wrapped function body: run the query, or short-circuit
#[derive(Debug, Clone)]
pub enum Prepared {
    Proceed(QueryDescription),
    /// Skip execution and return the shape's default result
    Cancelled,
}

impl Prepared {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Prepared::Cancelled)
    }

    /// The statement this body produced, if it is textual and not cancelled
    pub fn statement(&self) -> Option<&Statement> {
        match self {
            Prepared::Proceed(query) => query.as_statement(),
            Prepared::Cancelled => None,
        }
    }
}

/// Return types accepted from a wrapped function body
pub trait IntoPrepared {
    fn into_prepared(self) -> Result<Prepared>;
}

impl IntoPrepared for Prepared {
    fn into_prepared(self) -> Result<Prepared> {
        Ok(self)
    }
}

/// `()` runs the decorator's SQL without parameters
impl IntoPrepared for () {
    fn into_prepared(self) -> Result<Prepared> {
        Ok(Prepared::Proceed(Statement::default().into()))
    }
}

impl IntoPrepared for Statement {
    fn into_prepared(self) -> Result<Prepared> {
        Ok(Prepared::Proceed(self.into()))
    }
}

impl IntoPrepared for QueryDescription {
    fn into_prepared(self) -> Result<Prepared> {
        Ok(Prepared::Proceed(self))
    }
}

impl IntoPrepared for NativeQuery {
    fn into_prepared(self) -> Result<Prepared> {
        Ok(Prepared::Proceed(self.into()))
    }
}

impl<T: IntoPrepared, E: Into<SqlFnError>> IntoPrepared for std::result::Result<T, E> {
    fn into_prepared(self) -> Result<Prepared> {
        self.map_err(Into::into)?.into_prepared()
    }
}

/// Positional parameters: `params![1, "John"]`
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::SqlValue::from($value)),+])
    };
}

/// Named parameters for `@name` placeholders: `named_params! { "id" => 1 }`
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::Params::None
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Params::Named(vec![$(($name.to_string(), $crate::SqlValue::from($value))),+])
    };
}
