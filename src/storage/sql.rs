// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend.
//!
//! One pool, MySQL or SQLite, through the sqlx `Any` driver. Statements come
//! from [`SqlTranslator`]; values are bound positionally.
//!
//! ## sqlx Any Driver Quirks
//!
//! Rows are decoded by the declared [`ColumnType`] with fallbacks, because
//! the `Any` driver reports what the database sent rather than what the
//! column is:
//! 1. MySQL TEXT columns may arrive as BLOB (read as `Vec<u8>`, then UTF-8)
//! 2. Booleans arrive as integers on SQLite and as TINYINT on MySQL
//! 3. Aggregates (`COUNT(*)`) may arrive as DECIMAL on MySQL
//!
//! In-memory SQLite gives every connection its own database, so the pool is
//! pinned to a single connection that never expires.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyConnection, AnyPool, Column, Row as SqlxRow, Transaction, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{RowExecutor, RowStore, SelectQuery, StorageError, StoreTransaction, Upsert};
use crate::config::ModelbaseConfig;
use crate::filter::{group_by_columns, Dialect, Predicate, SqlQuery, SqlTranslator};
use crate::metrics;
use crate::resilience::retry::{retry, RetryConfig};
use crate::schema::{ColumnType, KeyStrategy, TableSchema};
use crate::value::{Row, Value};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::EmptyResult,
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateKey {
                table: db.table().unwrap_or_default().to_string(),
                key: db.message().to_string(),
            },
            sqlx::Error::Database(db) => StorageError::Database {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Connection(e.to_string()),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

pub struct SqlStore {
    pool: AnyPool,
    translator: SqlTranslator,
}

impl SqlStore {
    /// Connect with default settings.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::connect(&ModelbaseConfig::for_url(connection_string)).await
    }

    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn connect(config: &ModelbaseConfig) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(&config.database_url);
        let in_memory = config.is_in_memory_sqlite();

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            let options = AnyPoolOptions::new().acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));
            let options = if in_memory {
                options
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                options
                    .max_connections(config.max_connections)
                    .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            };
            options.connect(&config.database_url).await.map_err(|e| {
                metrics::record_connection_error("sql");
                StorageError::from(e)
            })
        })
        .await?;

        let store = Self {
            pool,
            translator: SqlTranslator::new(dialect),
        };

        if dialect == Dialect::Sqlite && config.sqlite_wal && !in_memory {
            store.enable_wal_mode().await?;
        }

        metrics::set_pool_connections("sql", store.pool.size());
        info!(dialect = ?dialect, "SQL store connected");
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing with other components.
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.translator.dialect()
    }

    /// Run raw SQL (DDL, fixtures). Returns rows affected.
    pub async fn execute(&self, sql: &str) -> Result<u64, StorageError> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl RowExecutor for SqlStore {
    async fn fetch(&self, schema: &TableSchema, query: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        let sql = self.translator.select(schema, query);
        retry("sql_fetch", &RetryConfig::query(), || async {
            let mut conn = self.pool.acquire().await?;
            fetch_rows(&mut conn, schema, &sql).await
        })
        .await
    }

    async fn count(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        let sql = self.translator.count(schema, filter);
        retry("sql_count", &RetryConfig::query(), || async {
            let mut conn = self.pool.acquire().await?;
            count_rows(&mut conn, &sql).await
        })
        .await
    }

    async fn insert(&self, schema: &TableSchema, row: &Row) -> Result<Option<i64>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        insert_row(&mut conn, &self.translator, schema, row).await
    }

    async fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        insert_rows(&mut conn, &self.translator, schema, rows).await
    }

    async fn update(&self, schema: &TableSchema, filter: &Predicate, changes: &Row) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, &self.translator.update(schema, filter, changes)).await
    }

    async fn delete(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, &self.translator.delete(schema, filter)).await
    }

    async fn upsert(&self, schema: &TableSchema, upsert: &Upsert) -> Result<u64, StorageError> {
        if upsert.rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, &self.translator.upsert(schema, upsert)).await
    }
}

#[async_trait]
impl RowStore for SqlStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlTransaction {
            tx: Mutex::new(Some(tx)),
            translator: self.translator,
        }))
    }

    fn as_executor(&self) -> &dyn RowExecutor {
        self
    }
}

/// Open transaction on one pooled connection. Concurrent callers are
/// serialized on the connection.
pub struct SqlTransaction {
    tx: Mutex<Option<Transaction<'static, Any>>>,
    translator: SqlTranslator,
}

impl SqlTransaction {
    fn finished() -> StorageError {
        StorageError::Backend("transaction already finished".to_string())
    }
}

#[async_trait]
impl RowExecutor for SqlTransaction {
    async fn fetch(&self, schema: &TableSchema, query: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        fetch_rows(&mut **tx, schema, &self.translator.select(schema, query)).await
    }

    async fn count(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        count_rows(&mut **tx, &self.translator.count(schema, filter)).await
    }

    async fn insert(&self, schema: &TableSchema, row: &Row) -> Result<Option<i64>, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        insert_row(&mut **tx, &self.translator, schema, row).await
    }

    async fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        insert_rows(&mut **tx, &self.translator, schema, rows).await
    }

    async fn update(&self, schema: &TableSchema, filter: &Predicate, changes: &Row) -> Result<u64, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        execute(&mut **tx, &self.translator.update(schema, filter, changes)).await
    }

    async fn delete(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        execute(&mut **tx, &self.translator.delete(schema, filter)).await
    }

    async fn upsert(&self, schema: &TableSchema, upsert: &Upsert) -> Result<u64, StorageError> {
        if upsert.rows.is_empty() {
            return Ok(0);
        }
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        execute(&mut **tx, &self.translator.upsert(schema, upsert)).await
    }
}

#[async_trait]
impl StoreTransaction for SqlTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let tx = self.tx.into_inner().ok_or_else(Self::finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let tx = self.tx.into_inner().ok_or_else(Self::finished)?;
        tx.rollback().await?;
        Ok(())
    }

    fn as_executor(&self) -> &dyn RowExecutor {
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Statement execution on a single connection
// ═══════════════════════════════════════════════════════════════════════════

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

fn bind_params<'q>(mut query: AnyQuery<'q>, params: &[Value]) -> AnyQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
        };
    }
    query
}

async fn fetch_rows(conn: &mut AnyConnection, schema: &TableSchema, sql: &SqlQuery) -> Result<Vec<Row>, StorageError> {
    debug!(sql = %sql.sql, params = sql.params.len(), "fetch");
    let rows = bind_params(sqlx::query(&sql.sql), &sql.params)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|row| decode_row(schema, row)).collect()
}

async fn count_rows(conn: &mut AnyConnection, sql: &SqlQuery) -> Result<u64, StorageError> {
    let row = bind_params(sqlx::query(&sql.sql), &sql.params)
        .fetch_one(&mut *conn)
        .await?;
    let count = row
        .try_get::<i64, _>("count")
        .ok()
        .or_else(|| row.try_get::<f64, _>("count").ok().map(|f| f as i64))
        .or_else(|| {
            row.try_get::<String, _>("count")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .ok_or_else(|| StorageError::Backend("COUNT(*) returned no usable value".to_string()))?;
    Ok(count.max(0) as u64)
}

async fn execute(conn: &mut AnyConnection, sql: &SqlQuery) -> Result<u64, StorageError> {
    debug!(sql = %sql.sql, params = sql.params.len(), "execute");
    let result = bind_params(sqlx::query(&sql.sql), &sql.params)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn insert_row(
    conn: &mut AnyConnection,
    translator: &SqlTranslator,
    schema: &TableSchema,
    row: &Row,
) -> Result<Option<i64>, StorageError> {
    let sql = translator.insert(schema, row);
    debug!(sql = %sql.sql, "insert");
    let result = bind_params(sqlx::query(&sql.sql), &sql.params)
        .execute(&mut *conn)
        .await?;

    if schema.key_strategy() != KeyStrategy::AutoIncrement {
        return Ok(None);
    }
    Ok(row
        .get_non_null(schema.primary_key())
        .and_then(Value::as_i64)
        .or_else(|| result.last_insert_id()))
}

async fn insert_rows(
    conn: &mut AnyConnection,
    translator: &SqlTranslator,
    schema: &TableSchema,
    rows: &[Row],
) -> Result<u64, StorageError> {
    let mut written = 0;
    for group in group_by_columns(rows) {
        if group.first().is_some_and(|row| row.is_empty()) {
            // No column list to share; insert one at a time.
            for row in group {
                insert_row(conn, translator, schema, row).await?;
                written += 1;
            }
            continue;
        }
        let group: Vec<Row> = group.into_iter().cloned().collect();
        written += execute(conn, &translator.insert_rows(schema, &group)).await?;
    }
    Ok(written)
}

/// Decode by declared column type, falling back through the shapes the
/// `Any` driver is known to produce.
fn decode_row(schema: &TableSchema, row: &AnyRow) -> Result<Row, StorageError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name();
        if row.try_get_raw(i)?.is_null() {
            out.set(name, Value::Null);
            continue;
        }

        let text = || {
            row.try_get::<String, _>(i)
                .ok()
                .or_else(|| row.try_get::<Vec<u8>, _>(i).ok().and_then(|b| String::from_utf8(b).ok()))
        };
        let int = || row.try_get::<i64, _>(i).ok();
        let float = || row.try_get::<f64, _>(i).ok();

        let value = match schema.column_type(name) {
            Some(ColumnType::Integer | ColumnType::Timestamp) => int()
                .map(Value::Int)
                .or_else(|| float().map(|f| Value::Int(f as i64)))
                .or_else(|| text().and_then(|s| s.parse().ok()).map(Value::Int)),
            Some(ColumnType::Float) => float()
                .map(Value::Float)
                .or_else(|| int().map(|n| Value::Float(n as f64)))
                .or_else(|| text().and_then(|s| s.parse().ok()).map(Value::Float)),
            Some(ColumnType::Boolean) => row
                .try_get::<bool, _>(i)
                .ok()
                .or_else(|| int().map(|n| n != 0))
                .map(Value::Bool),
            Some(ColumnType::Binary) => row.try_get::<Vec<u8>, _>(i).ok().map(Value::Bytes),
            Some(ColumnType::Text) => text().map(Value::Text),
            None => int()
                .map(Value::Int)
                .or_else(|| float().map(Value::Float))
                .or_else(|| text().map(Value::Text))
                .or_else(|| row.try_get::<Vec<u8>, _>(i).ok().map(Value::Bytes)),
        };

        let value = value.ok_or_else(|| {
            StorageError::Backend(format!("cannot decode column '{}' of '{}'", name, schema.table()))
        })?;
        out.set(name, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CompareOp;
    use crate::storage::traits::SortOrder;

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column("id", ColumnType::Integer)
            .column("email", ColumnType::Text)
            .column("balance", ColumnType::Float)
            .column("active", ColumnType::Boolean)
            .composite_key(&["email"])
    }

    async fn store() -> SqlStore {
        let store = SqlStore::new("sqlite::memory:").await.unwrap();
        store
            .execute(
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT UNIQUE,
                    balance REAL,
                    active INTEGER
                )",
            )
            .await
            .unwrap();
        store
    }

    fn user(email: &str, balance: f64) -> Row {
        Row::new().with("email", email).with("balance", balance).with("active", true)
    }

    #[tokio::test]
    async fn test_insert_returns_generated_id_and_decodes_types() {
        let store = store().await;
        let schema = users();
        assert_eq!(store.insert(&schema, &user("a@x.com", 1.5)).await.unwrap(), Some(1));
        assert_eq!(store.insert(&schema, &user("b@x.com", 2.0)).await.unwrap(), Some(2));

        let row = store
            .fetch_one(&schema, &SelectQuery::filtered(Some(Predicate::eq("users.id", 1))))
            .await
            .unwrap();
        assert_eq!(row.get("email"), Some(&Value::from("a@x.com")));
        assert_eq!(row.get("balance"), Some(&Value::Float(1.5)));
        assert_eq!(row.get("active"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_empty_row_insert_uses_defaults() {
        let store = store().await;
        let id = store.insert(&users(), &Row::new()).await.unwrap();
        assert_eq!(id, Some(1));
        let rows = store.fetch(&users(), &SelectQuery::default()).await.unwrap();
        assert_eq!(rows[0].get("email"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_database_errors_carry_codes() {
        let store = store().await;
        let schema = users();
        store.insert(&schema, &user("a@x.com", 1.0)).await.unwrap();
        let err = store.insert(&schema, &user("a@x.com", 1.0)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(err.code(), Some("ER_DUP_ENTRY"));

        let err = store.execute("INSERT INTO missing VALUES (1)").await.unwrap_err();
        assert!(matches!(err, StorageError::Database { .. }));
        assert!(err.code().is_some());
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let store = store().await;
        let schema = users();

        let tx = store.begin().await.unwrap();
        tx.insert(&schema, &user("a@x.com", 1.0)).await.unwrap();
        assert_eq!(tx.count(&schema, None).await.unwrap(), 1);
        tx.rollback().await.unwrap();

        assert_eq!(store.count(&schema, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_count_and_delete() {
        let store = store().await;
        let schema = users();
        store
            .insert_many(&schema, &[user("a", 10.0), user("b", 20.0), user("c", 30.0)])
            .await
            .unwrap();

        let rich = Predicate::compare("users.balance", CompareOp::Gt, 15.0);
        assert_eq!(store.count(&schema, Some(&rich)).await.unwrap(), 2);
        assert_eq!(
            store.update(&schema, &rich, &Row::new().with("active", false)).await.unwrap(),
            2
        );
        assert_eq!(store.delete(&schema, Some(&rich)).await.unwrap(), 2);
        assert_eq!(store.count(&schema, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rewrites_listed_columns() {
        let store = store().await;
        let schema = users();
        store.insert(&schema, &user("a", 1.0)).await.unwrap();

        let upsert = Upsert {
            columns: vec!["id".into(), "email".into(), "balance".into()],
            rows: vec![
                vec![Value::Int(1), Value::from("a"), Value::Float(9.0)],
                vec![Value::Int(2), Value::from("b"), Value::Float(2.0)],
            ],
            conflict_columns: vec!["id".into()],
            update_columns: vec!["balance".into()],
        };
        store.upsert(&schema, &upsert).await.unwrap();

        let rows = store
            .fetch(&schema, &SelectQuery::default().order_by("id", SortOrder::Asc))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("balance"), Some(&Value::Float(9.0)));
    }
}
