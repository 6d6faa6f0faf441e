//! Repository scenarios against an in-memory SQLite database.
//!
//! These exercise the real SQL path (translator, binding, decoding,
//! transactions) without any external service.
//!
//! Run with: `cargo test --test sqlite`

use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};

use modelbase::schema::{ColumnType, TableSchema};
use modelbase::storage::sql::SqlStore;
use modelbase::{BulkInsertOptions, BulkUpdateOptions, ModelError, Repository, Row, SyncOptions, Value};

// =============================================================================
// Fixtures
// =============================================================================

const USER_COLUMNS: &[&str] = &["id", "email", "first_name", "address", "balance", "status"];

fn obj(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().cloned().unwrap()
}

async fn store() -> SqlStore {
    let store = SqlStore::new("sqlite::memory:").await.unwrap();
    for ddl in [
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE,
            first_name TEXT,
            address TEXT,
            balance INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER,
            updated_at INTEGER
        )",
        "CREATE TABLE budgets (
            id BLOB PRIMARY KEY,
            type TEXT NOT NULL,
            year INTEGER NOT NULL,
            budget REAL,
            UNIQUE (type, year)
        )",
        "CREATE TABLE accounts (
            id INTEGER PRIMARY KEY,
            name TEXT,
            deleted_at INTEGER
        )",
    ] {
        store.execute(ddl).await.unwrap();
    }
    store
}

fn users_schema() -> TableSchema {
    TableSchema::new("users")
        .column("id", ColumnType::Integer)
        .column("email", ColumnType::Text)
        .column("first_name", ColumnType::Text)
        .column("address", ColumnType::Text)
        .column("balance", ColumnType::Integer)
        .column("status", ColumnType::Text)
        .column("created_at", ColumnType::Timestamp)
        .column("updated_at", ColumnType::Timestamp)
        .timestamps()
        .composite_key(&["email"])
}

fn budgets_schema() -> TableSchema {
    TableSchema::new("budgets")
        .column("id", ColumnType::Binary)
        .column("type", ColumnType::Text)
        .column("year", ColumnType::Integer)
        .column("budget", ColumnType::Float)
        .ordered_uuid("id", "BU")
        .composite_key(&["type", "year"])
}

fn accounts_schema() -> TableSchema {
    TableSchema::new("accounts")
        .column("id", ColumnType::Integer)
        .column("name", ColumnType::Text)
        .column("deleted_at", ColumnType::Timestamp)
        .natural_key("id")
        .soft_delete("deleted_at")
}

struct Fixture {
    users: Repository,
    budgets: Repository,
    accounts: Repository,
}

async fn fixture() -> Fixture {
    let store = Arc::new(store().await);
    let users = Repository::new(users_schema(), store.clone());
    for (email, name, balance) in [("ann@x.com", "Ann", 0), ("bob@x.com", "Bob", 100), ("cid@x.com", "Cid", 200)] {
        users
            .create_one(
                &obj(json!({"email": email, "first_name": name, "address": "old", "balance": balance})),
                USER_COLUMNS,
            )
            .await
            .unwrap();
    }
    Fixture {
        users,
        budgets: Repository::new(budgets_schema(), store.clone()),
        accounts: Repository::new(accounts_schema(), store),
    }
}

async fn all_users(repo: &Repository) -> Vec<Row> {
    repo.list(&obj(json!({"paginate": false})), USER_COLUMNS)
        .await
        .unwrap()
        .rows
}

// =============================================================================
// List and CRUD
// =============================================================================

#[tokio::test]
async fn sqlite_create_assigns_key_and_timestamps() {
    let f = fixture().await;
    let created = f
        .users
        .create_one(&obj(json!({"email": "dan@x.com", "balance": 7})), USER_COLUMNS)
        .await
        .unwrap();

    assert_eq!(created.get("id"), Some(&Value::Int(4)));
    assert_eq!(created.get("balance"), Some(&Value::Int(7)));
    assert!(created.get("created_at").and_then(Value::as_i64).is_some());
}

#[tokio::test]
async fn sqlite_list_filters_orders_and_paginates() {
    let f = fixture().await;

    let page = f
        .users
        .list(
            &obj(json!({"balance": {"operator": "between", "value": "50,150"}})),
            USER_COLUMNS,
        )
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].get("email"), Some(&Value::from("bob@x.com")));

    let page = f
        .users
        .list(
            &obj(json!({"order_by": "-balance", "limit": 2, "page": 2})),
            USER_COLUMNS,
        )
        .await
        .unwrap();
    assert_eq!(page.pagination.row_count, 3);
    assert_eq!(page.pagination.page_count, 2);
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].get("email"), Some(&Value::from("ann@x.com")));
}

#[tokio::test]
async fn sqlite_full_text_falls_back_to_like() {
    let f = fixture().await;
    let page = f
        .users
        .list(&obj(json!({"email": ["match", "bob"]})), USER_COLUMNS)
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 1);

    // Each word is matched on its own, as the in-memory store does.
    let page = f
        .users
        .list(&obj(json!({"email": ["match", "zed bob cid"]})), USER_COLUMNS)
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 2);

    let page = f
        .users
        .list(&obj(json!({"email": ["match_bool", "+x.com -ann -cid"]})), USER_COLUMNS)
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].get("email"), Some(&Value::from("bob@x.com")));
}

#[tokio::test]
async fn sqlite_update_returns_previous_snapshot() {
    let f = fixture().await;
    let updated = f
        .users
        .update_one(&obj(json!({"id": 2, "address": "new"})), &["address"])
        .await
        .unwrap();

    assert_eq!(updated.get("address"), Some(&Value::from("new")));
    assert_eq!(updated.saved_attributes().get("address"), Some(&Value::from("old")));
}

#[tokio::test]
async fn sqlite_update_to_duplicate_key_surfaces_database_code() {
    let f = fixture().await;
    let err = f
        .users
        .update_one_by_id(2, &obj(json!({"email": "ann@x.com"})), &["email"])
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::Storage(_)));
    assert_eq!(err.code(), "ER_DUP_ENTRY");
}

#[tokio::test]
async fn sqlite_ordered_uuid_round_trip() {
    let f = fixture().await;
    let created = f
        .budgets
        .create_one(
            &obj(json!({"type": "food", "year": 2024, "budget": 120.5})),
            &["type", "year", "budget"],
        )
        .await
        .unwrap();
    let id = created.get("id").and_then(Value::as_str).unwrap().to_string();
    assert!(id.starts_with("BU"));

    let found = f.budgets.find_by_id(id.as_str()).await.unwrap();
    assert_eq!(found.get("budget"), Some(&Value::Float(120.5)));

    let listed = f
        .budgets
        .list(&obj(json!({"id": id})), &["id", "type"])
        .await
        .unwrap();
    assert_eq!(listed.rows.len(), 1);
    assert_eq!(listed.rows[0].get("type"), Some(&Value::from("food")));
}

#[tokio::test]
async fn sqlite_soft_delete_then_import_restore() {
    let f = fixture().await;
    f.accounts
        .create_one(&obj(json!({"id": 1, "name": "a"})), &["id", "name"])
        .await
        .unwrap();

    assert_eq!(f.accounts.bulk_destroy_in(&[Value::Int(1)]).await.unwrap(), 1);
    assert_eq!(f.accounts.find_by_id(1).await.unwrap_err().code(), "NOT_FOUND");

    let count = f
        .accounts
        .import_many(&[obj(json!({"id": 1, "name": "b"}))], &["id", "name"], |_, changes: &mut Row| {
            changes.set("deleted_at", Value::Null);
            true
        })
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(f.accounts.find_by_id(1).await.unwrap().get("name"), Some(&Value::from("b")));
}

// =============================================================================
// Bulk
// =============================================================================

#[tokio::test]
async fn sqlite_bulk_insert_returns_rows_in_input_order() {
    let f = fixture().await;
    let rows = vec![
        Row::new().with("type", "rent").with("year", 2025).with("budget", 900.0),
        Row::new().with("type", "food").with("year", 2025).with("budget", 300.0),
    ];
    let inserted = f
        .budgets
        .bulk_insert(
            rows,
            BulkInsertOptions {
                return_rows: true,
                concurrent: false,
            },
        )
        .await
        .unwrap();

    let types: Vec<_> = inserted.iter().map(|r| r.get("type").cloned()).collect();
    assert_eq!(types, vec![Some(Value::from("rent")), Some(Value::from("food"))]);
}

#[tokio::test]
async fn sqlite_bulk_insert_leaves_omitted_columns_to_their_default() {
    let f = fixture().await;
    let rows = vec![
        Row::new().with("email", "dan@x.com").with("status", "paused"),
        Row::new().with("email", "eve@x.com"),
        Row::new().with("email", "fay@x.com").with("status", "closed"),
    ];
    let inserted = f
        .users
        .bulk_insert(
            rows,
            BulkInsertOptions {
                return_rows: false,
                concurrent: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(inserted.len(), 3);

    let page = f
        .users
        .list(
            &obj(json!({"email": {"operator": "in", "value": ["dan@x.com", "eve@x.com", "fay@x.com"]}, "order_by": "email"})),
            USER_COLUMNS,
        )
        .await
        .unwrap();
    let statuses: Vec<_> = page.rows.iter().map(|r| r.get("status").cloned()).collect();
    assert_eq!(
        statuses,
        vec![
            Some(Value::from("paused")),
            Some(Value::from("active")),
            Some(Value::from("closed"))
        ]
    );
}

#[tokio::test]
async fn sqlite_bulk_update_keeps_columns_a_row_omits() {
    let f = fixture().await;
    let registry = vec![
        Row::new().with("id", 1).with("email", "ann@x.com"),
        Row::new().with("id", 2).with("email", "bob@x.com"),
    ];
    f.users
        .bulk_update(
            &[
                Row::new().with("id", 1).with("status", "paused"),
                Row::new().with("id", 2).with("first_name", "Robert"),
            ],
            &registry,
            BulkUpdateOptions::default(),
        )
        .await
        .unwrap();

    let ann = f.users.find_by_id(1).await.unwrap();
    assert_eq!(ann.get("status"), Some(&Value::from("paused")));
    assert_eq!(ann.get("first_name"), Some(&Value::from("Ann")));
    let bob = f.users.find_by_id(2).await.unwrap();
    assert_eq!(bob.get("status"), Some(&Value::from("active")));
    assert_eq!(bob.get("balance"), Some(&Value::Int(100)));
}

#[tokio::test]
async fn sqlite_bulk_sync_applies_every_phase() {
    let f = fixture().await;
    let existing = all_users(&f.users).await;
    let desired = vec![
        existing[0].clone(),
        existing[1].clone().with("first_name", "Robert"),
        Row::new().with("email", "dan@x.com").with("first_name", "Dan"),
    ];

    let result = f
        .users
        .bulk_sync(&existing, &desired, &["email", "first_name"], SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(
        (result.inserted.len(), result.updated.len(), result.destroyed.len(), result.unchanged.len()),
        (1, 1, 1, 1)
    );

    let now = all_users(&f.users).await;
    let names: Vec<_> = now.iter().map(|r| r.get("first_name").cloned()).collect();
    assert_eq!(
        names,
        vec![
            Some(Value::from("Ann")),
            Some(Value::from("Robert")),
            Some(Value::from("Dan"))
        ]
    );
    // Bob's creation stamp survives the upsert.
    assert_eq!(now[1].get("created_at"), existing[1].get("created_at"));
}

#[tokio::test]
async fn sqlite_bulk_sync_failure_rolls_back() {
    let f = fixture().await;
    let existing = all_users(&f.users).await;
    let desired = vec![
        existing[0].clone(),
        existing[1].clone(),
        Row::new().with("email", "ann@x.com"),
    ];

    let result = f
        .users
        .bulk_sync(&existing, &desired, &["email"], SyncOptions::default())
        .await;
    assert!(result.is_err());
    assert_eq!(all_users(&f.users).await.len(), 3);
}

#[tokio::test]
async fn sqlite_bulk_upsert_and_destroy() {
    let f = fixture().await;
    let written = f
        .users
        .bulk_upsert(
            &[
                Row::new().with("id", 3).with("balance", 1),
                Row::new().with("email", "eve@x.com").with("balance", 2),
            ],
            BulkUpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(f.users.find_by_id(3).await.unwrap().get("balance"), Some(&Value::Int(1)));

    let removed = f
        .users
        .bulk_destroy(&obj(json!({"balance": ["<", 5]})), USER_COLUMNS)
        .await
        .unwrap();
    assert_eq!(removed, 3);
    assert_eq!(all_users(&f.users).await.len(), 1);
}

#[tokio::test]
async fn sqlite_import_inside_one_transaction() {
    let f = fixture().await;
    let rows = vec![
        obj(json!({"id": 1, "balance": 50})),
        obj(json!({"email": "fay@x.com", "first_name": "Fay"})),
        obj(json!({"email": "gus@x.com"})),
    ];

    let count = f
        .users
        .import_many(&rows, USER_COLUMNS, |_, _| false)
        .await
        .unwrap();
    assert_eq!(count, 3);

    let users = all_users(&f.users).await;
    assert_eq!(users.len(), 5);
    assert_eq!(users[0].get("balance"), Some(&Value::Int(50)));
    assert_eq!(users[0].get("first_name"), Some(&Value::from("Ann")));
}
