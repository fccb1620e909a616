pub mod config;
pub mod connection;
pub mod decimal;
pub mod decorator;
pub mod mapper;
pub mod multiprocess;
pub mod query;
pub mod record;
pub mod registry;
pub mod result;
pub mod row;
pub mod strategy;
pub mod str_utils;
pub mod value;

#[cfg(feature = "sqlite")]
pub mod runner_sqlite;

#[cfg(feature = "postgresql")]
pub mod runner_postgresql;

// Re-export types for convenience
pub use config::{QuerySpec, Settings};
pub use connection::{AsyncConnection, AsyncCursor, BufferedCursor, Capabilities, Connection, Cursor};
pub use decimal::Decimal;
pub use decorator::{
    AsyncRowIter, Decorator, IterDecorator, RowIter, SqlFn, SqlIterFn, sql_execute, sql_fetch_all,
    sql_fetch_scalars, sql_iterate, sql_iterate_scalars, sql_one_or_none, sql_scalar_or_none,
};
pub use query::{IntoPrepared, NativeQuery, Params, Prepared, QueryDescription, Statement};
pub use record::{FieldDef, FieldType, FromRecord, Record, RecordType};
pub use registry::{
    EventListener, FuncCallEvent, MultiprocessRole, Registry, RegistryMode, UsageRecord,
    get_registry,
};
pub use result::{Result, SqlFnError};
pub use row::Row;
pub use strategy::ResultShape;
pub use value::{FromValue, SqlValue};

// Re-export third-party types used in the public API to provide fallback for dependency conflicts
pub use serde_json::Value as JsonValue;

#[cfg(feature = "sqlite")]
pub use rusqlite::Connection as SqliteConnection;

#[cfg(feature = "postgresql")]
pub use runner_postgresql::PgStatement;
#[cfg(feature = "postgresql")]
pub use tokio_postgres::Client as PostgresClient;
