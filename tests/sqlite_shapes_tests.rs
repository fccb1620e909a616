mod common;

use chrono::NaiveDate;
use common::User;
use rusqlite::Connection;
use sqlfn::{
    Decimal, FieldDef, FieldType, FromRecord, Record, RecordType, Registry, Result, SqlFnError,
    SqlValue, Statement, named_params, params, sql_execute, sql_fetch_all, sql_fetch_scalars,
    sql_one_or_none, sql_scalar_or_none,
};

fn setup_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);
         INSERT INTO users (name) VALUES ('John'), ('Jane');",
    )
    .unwrap();
    conn
}

#[derive(Debug, PartialEq)]
struct Payment {
    id: i64,
    amount: Decimal,
    paid_on: NaiveDate,
    note: Option<String>,
}

impl FromRecord for Payment {
    fn record_type() -> RecordType {
        RecordType::new(
            "Payment",
            vec![
                FieldDef::of::<i64>("id"),
                FieldDef::of::<Decimal>("amount"),
                FieldDef::of::<NaiveDate>("paid_on"),
                FieldDef::optional("note", FieldType::Text),
            ],
        )
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Payment {
            id: record.take("id")?,
            amount: record.take("amount")?,
            paid_on: record.take("paid_on")?,
            note: record.take("note")?,
        })
    }
}

#[test]
fn test_fetch_all_maps_every_row() {
    let registry = Registry::new();
    let list_users = sql_fetch_all::<User>()
        .sql("SELECT id, name FROM users ORDER BY id")
        .named("users::list")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    let users = list_users.call(&mut conn, ()).unwrap();
    assert_eq!(
        users,
        vec![
            User { id: 1, name: "John".to_string() },
            User { id: 2, name: "Jane".to_string() },
        ]
    );

    let stat = registry.get("users::list").unwrap();
    assert_eq!(stat.calls, 1);
    assert_eq!(stat.tuples, 2);
    assert_eq!(stat.fails, 0);
}

#[test]
fn test_fetch_all_empty_result() {
    let registry = Registry::new();
    let find = sql_fetch_all::<User>()
        .sql("SELECT id, name FROM users WHERE name = @name")
        .registry(&registry)
        .wrap(|name: &str| Statement::params(named_params! { "name" => name }));

    let mut conn = setup_db();
    assert!(find.call(&mut conn, "Nobody").unwrap().is_empty());
    assert_eq!(registry.get(find.name()).unwrap().tuples, 0);
}

#[test]
fn test_one_or_none_by_id() {
    let registry = Registry::new();
    let get_user = sql_one_or_none::<User>()
        .sql("SELECT id, name FROM users WHERE id = @id")
        .registry(&registry)
        .wrap(|id: i64| Statement::params(named_params! { "id" => id }));

    let mut conn = setup_db();
    assert_eq!(
        get_user.call(&mut conn, 2).unwrap(),
        Some(User { id: 2, name: "Jane".to_string() })
    );
    assert_eq!(get_user.call(&mut conn, 99).unwrap(), None);

    let stat = registry.get(get_user.name()).unwrap();
    assert_eq!(stat.calls, 2);
    assert_eq!(stat.tuples, 1);
}

#[test]
fn test_one_or_none_lenient_takes_first_row() {
    let registry = Registry::new();
    let first = sql_one_or_none::<User>()
        .sql("SELECT id, name FROM users ORDER BY id")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    assert!(!first.is_strict());
    assert_eq!(first.call(&mut conn, ()).unwrap().unwrap().id, 1);
}

#[test]
fn test_one_or_none_strict_rejects_second_row() {
    let registry = Registry::new();
    let only = sql_one_or_none::<User>()
        .sql("SELECT id, name FROM users")
        .named("users::only")
        .strict(true)
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    let err = only.call(&mut conn, ()).unwrap_err();
    assert!(matches!(err, SqlFnError::TooManyRows(ref name) if name == "users::only"));

    let stat = registry.get("users::only").unwrap();
    assert_eq!(stat.fails, 1);
    assert_eq!(stat.fails_by_error.get("TooManyRowsError"), Some(&1));
}

#[test]
fn test_scalar_or_none() {
    let registry = Registry::new();
    let count = sql_scalar_or_none::<i64>()
        .sql("SELECT COUNT(*) FROM users")
        .registry(&registry)
        .wrap(|()| ());
    let name_of = sql_scalar_or_none::<String>()
        .sql("SELECT name FROM users WHERE id = ?")
        .registry(&registry)
        .wrap(|id: i64| Statement::params(params![id]));
    let nothing = sql_scalar_or_none::<i64>()
        .sql("SELECT NULL")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    assert_eq!(count.call(&mut conn, ()).unwrap(), Some(2));
    assert_eq!(name_of.call(&mut conn, 1).unwrap(), Some("John".to_string()));
    assert_eq!(name_of.call(&mut conn, 7).unwrap(), None);
    assert_eq!(nothing.call(&mut conn, ()).unwrap(), None);
}

#[test]
fn test_fetch_scalars() {
    let registry = Registry::new();
    let names = sql_fetch_scalars::<String>()
        .sql("SELECT name FROM users ORDER BY name")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    assert_eq!(names.call(&mut conn, ()).unwrap(), vec!["Jane", "John"]);
    assert_eq!(registry.get(names.name()).unwrap().tuples, 2);
}

#[test]
fn test_execute_applies_and_counts_no_tuples() {
    let registry = Registry::new();
    let insert = sql_execute()
        .sql("INSERT INTO users (name) VALUES (@name)")
        .named("users::insert")
        .registry(&registry)
        .wrap(|name: String| Statement::params(named_params! { "name" => name }));

    let mut conn = setup_db();
    insert.call(&mut conn, "Alice".to_string()).unwrap();

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 3);
    let stat = registry.get("users::insert").unwrap();
    assert_eq!(stat.calls, 1);
    assert_eq!(stat.tuples, 0);
}

#[test]
fn test_body_sql_overrides_default() {
    let registry = Registry::new();
    let search = sql_fetch_all::<User>()
        .sql("SELECT id, name FROM users")
        .registry(&registry)
        .wrap(|prefix: &str| {
            Statement::query_and_params(
                "SELECT id, name FROM users WHERE name LIKE ? ORDER BY id",
                params![format!("{prefix}%")],
            )
        });

    let mut conn = setup_db();
    let users = search.call(&mut conn, "Ja").unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "Jane");
}

#[test]
fn test_missing_sql_is_configuration_error() {
    let registry = Registry::new();
    let broken = sql_fetch_all::<User>()
        .named("users::broken")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    let err = broken.call(&mut conn, ()).unwrap_err();
    assert!(matches!(err, SqlFnError::MissingStatement(_)));
    assert_eq!(
        registry.get("users::broken").unwrap().fails_by_error.get("ConfigurationError"),
        Some(&1)
    );
}

#[test]
fn test_body_error_is_recorded_without_execution() {
    let registry = Registry::new();
    let checked = sql_one_or_none::<User>()
        .sql("SELECT id, name FROM users WHERE id = ?")
        .named("users::checked")
        .registry(&registry)
        .wrap(|id: i64| {
            if id <= 0 {
                return Err(SqlFnError::new_configuration("id must be positive"));
            }
            Ok(Statement::params(params![id]))
        });

    let mut conn = setup_db();
    assert!(checked.call(&mut conn, -1).is_err());
    assert_eq!(checked.call(&mut conn, 1).unwrap().unwrap().name, "John");

    let stat = registry.get("users::checked").unwrap();
    assert_eq!(stat.calls, 2);
    assert_eq!(stat.fails, 1);
}

#[test]
fn test_rich_types_parsed_from_text_columns() {
    let registry = Registry::new();
    let payments = sql_fetch_all::<Payment>()
        .sql("SELECT id, amount, paid_on, note FROM payments ORDER BY id")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE payments (id INTEGER PRIMARY KEY, amount TEXT, paid_on TEXT, note TEXT);
         INSERT INTO payments VALUES (1, '19.99', '2024-03-01', NULL), (2, '5', '2024-03-02', 'cash');",
    )
    .unwrap();

    let rows = payments.call(&mut conn, ()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].amount, "19.99".parse::<Decimal>().unwrap());
    assert_eq!(rows[0].paid_on, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    assert_eq!(rows[0].note, None);
    assert_eq!(rows[1].amount, Decimal::from(5));
    assert_eq!(rows[1].note.as_deref(), Some("cash"));
}

#[test]
fn test_unparseable_rich_value_names_field() {
    let registry = Registry::new();
    let payments = sql_fetch_all::<Payment>()
        .sql("SELECT 1 AS id, 'lots' AS amount, '2024-01-01' AS paid_on")
        .named("payments::bad")
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    match payments.call(&mut conn, ()).unwrap_err() {
        SqlFnError::Mapping { field, .. } => assert_eq!(field, "amount"),
        other => panic!("Expected Mapping error, got {other:?}"),
    }
    assert_eq!(
        registry.get("payments::bad").unwrap().fails_by_error.get("MappingError"),
        Some(&1)
    );
}

#[test]
fn test_open_record_and_custom_record_type() {
    let registry = Registry::new();
    let raw = sql_one_or_none::<Record>()
        .sql("SELECT id, name FROM users WHERE id = 1")
        .registry(&registry)
        .wrap(|()| ());
    let ids_only = sql_fetch_all::<serde_json::Value>()
        .sql("SELECT id, name FROM users ORDER BY id")
        .record_type(RecordType::new("Id", vec![FieldDef::required("id", FieldType::Integer)]))
        .registry(&registry)
        .wrap(|()| ());

    let mut conn = setup_db();
    let record = raw.call(&mut conn, ()).unwrap().unwrap();
    assert_eq!(record.get("name"), Some(&SqlValue::from("John")));
    assert_eq!(
        ids_only.call(&mut conn, ()).unwrap(),
        vec![serde_json::json!({"id": 1}), serde_json::json!({"id": 2})]
    );
}

#[test]
fn test_unwrapped_calls_original_body() {
    let registry = Registry::new();
    let get_user = sql_one_or_none::<User>()
        .sql("SELECT id, name FROM users WHERE id = ?")
        .registry(&registry)
        .wrap(|id: i64| Statement::params(params![id]));

    let statement = get_user.unwrapped(5);
    assert_eq!(statement.params, params![5i64]);
    assert!(registry.get(get_user.name()).is_none());
}

#[test]
fn test_transaction_as_collaborator() {
    let registry = Registry::new();
    let insert = sql_execute()
        .sql("INSERT INTO users (name) VALUES (?)")
        .registry(&registry)
        .wrap(|name: &str| Statement::params(params![name]));

    let mut conn = setup_db();
    {
        let mut tx = conn.transaction().unwrap();
        insert.call(&mut tx, "Temp").unwrap();
        tx.rollback().unwrap();
    }
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
}
