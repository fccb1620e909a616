mod common;

use common::{MockConnection, User, user_rows};
use sqlfn::{
    Prepared, Registry, Statement, params, sql_execute, sql_fetch_all, sql_fetch_scalars,
    sql_one_or_none, sql_scalar_or_none,
};
use std::time::Duration;

fn maybe(id: i64) -> Prepared {
    if id < 0 {
        Prepared::Cancelled
    } else {
        Prepared::Proceed(Statement::params(params![id]).into())
    }
}

#[test]
fn test_cancelled_fetch_all_returns_empty_without_execute() {
    let registry = Registry::new();
    let list = sql_fetch_all::<User>()
        .sql("SELECT id, name FROM users WHERE id > ?")
        .named("users::list")
        .registry(&registry)
        .wrap(maybe);

    let mut conn = MockConnection::with_rows(user_rows(&[(1, "John")]));
    assert!(list.call(&mut conn, -1).unwrap().is_empty());
    assert_eq!(conn.executions(), 0);
    assert_eq!(conn.fetches(), 0);

    let stat = registry.get("users::list").unwrap();
    assert_eq!(stat.calls, 1);
    assert_eq!(stat.fails, 0);
    assert_eq!(stat.tuples, 0);
    assert_eq!(stat.duration, Duration::ZERO);
}

#[test]
fn test_cancelled_defaults_per_shape() {
    let registry = Registry::new();
    let mut conn = MockConnection::with_rows(user_rows(&[(1, "John")]));

    let one = sql_one_or_none::<User>().sql("q").registry(&registry).wrap(maybe);
    let scalar = sql_scalar_or_none::<i64>().sql("q").registry(&registry).wrap(maybe);
    let scalars = sql_fetch_scalars::<i64>().sql("q").registry(&registry).wrap(maybe);
    let exec = sql_execute().sql("q").registry(&registry).wrap(maybe);

    assert_eq!(one.call(&mut conn, -1).unwrap(), None);
    assert_eq!(scalar.call(&mut conn, -1).unwrap(), None);
    assert!(scalars.call(&mut conn, -1).unwrap().is_empty());
    exec.call(&mut conn, -1).unwrap();

    assert_eq!(conn.executions(), 0);
}

#[test]
fn test_proceeding_call_uses_default_sql() {
    let registry = Registry::new();
    let get_user = sql_one_or_none::<User>()
        .sql("SELECT id, name FROM users WHERE id = ?")
        .registry(&registry)
        .wrap(maybe);

    let mut conn = MockConnection::with_rows(user_rows(&[(3, "Ann")]));
    let user = get_user.call(&mut conn, 3).unwrap().unwrap();
    assert_eq!(user.name, "Ann");
    assert_eq!(
        conn.executed_sql(),
        vec![Some("SELECT id, name FROM users WHERE id = ?".to_string())]
    );
    let statement = conn.last_query().unwrap();
    assert_eq!(statement.as_statement().unwrap().params, params![3i64]);
}

#[test]
fn test_cancellation_mixed_with_real_calls() {
    let registry = Registry::new();
    let list = sql_fetch_all::<User>()
        .sql("SELECT id, name FROM users")
        .named("users::mixed")
        .registry(&registry)
        .wrap(maybe);

    let mut conn = MockConnection::with_rows(user_rows(&[(1, "John"), (2, "Jane")]));
    list.call(&mut conn, 1).unwrap();
    list.call(&mut conn, -1).unwrap();
    list.call(&mut conn, 2).unwrap();

    let stat = registry.get("users::mixed").unwrap();
    assert_eq!(stat.calls, 3);
    assert_eq!(stat.tuples, 4);
    assert_eq!(conn.executions(), 2);
}
