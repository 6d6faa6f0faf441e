// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process row store.
//!
//! Tables live in a [`DashMap`]; predicates are evaluated with
//! [`Predicate::matches`]. Transactions work on private copies of the tables
//! they touch and publish them on commit (last commit wins per table).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{RowExecutor, RowStore, SelectQuery, SortOrder, StorageError, StoreTransaction, Upsert};
use crate::filter::Predicate;
use crate::schema::{unqualified, KeyStrategy, TableSchema};
use crate::value::{Row, Value};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default)]
struct MemTable {
    rows: Vec<Row>,
    last_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<DashMap<String, MemTable>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of a table (0 if it was never written).
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Snapshot of a table's rows in insertion order, stored form.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Drop every table.
    pub fn clear(&self) {
        self.tables.clear();
    }

    fn read<T>(&self, table: &str, f: impl FnOnce(&MemTable) -> T) -> T {
        match self.tables.get(table) {
            Some(t) => f(&t),
            None => f(&MemTable::default()),
        }
    }

    /// Apply `f` to a copy and keep it only on success.
    fn write<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut entry = self.tables.entry(table.to_string()).or_default();
        let mut copy = entry.clone();
        let out = f(&mut copy)?;
        *entry = copy;
        Ok(out)
    }
}

#[async_trait]
impl RowExecutor for MemoryStore {
    async fn fetch(&self, schema: &TableSchema, query: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        Ok(self.read(schema.table(), |t| select(t, query)))
    }

    async fn count(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        Ok(self.read(schema.table(), |t| count(t, filter)))
    }

    async fn insert(&self, schema: &TableSchema, row: &Row) -> Result<Option<i64>, StorageError> {
        self.write(schema.table(), |t| insert(t, schema, row))
    }

    async fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| insert_many(t, schema, rows))
    }

    async fn update(&self, schema: &TableSchema, filter: &Predicate, changes: &Row) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| update(t, schema, filter, changes))
    }

    async fn delete(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| Ok(delete(t, filter)))
    }

    async fn upsert(&self, schema: &TableSchema, upsert: &Upsert) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| apply_upsert(t, schema, upsert))
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            working: Mutex::new(HashMap::new()),
        }))
    }

    fn as_executor(&self) -> &dyn RowExecutor {
        self
    }
}

struct Working {
    table: MemTable,
    dirty: bool,
}

/// Transaction over [`MemoryStore`]. Tables are copied on first touch.
pub struct MemoryTransaction {
    tables: Arc<DashMap<String, MemTable>>,
    working: Mutex<HashMap<String, Working>>,
}

impl MemoryTransaction {
    fn with_working<T>(&self, table: &str, f: impl FnOnce(&mut Working) -> T) -> T {
        let mut working = self.working.lock();
        let slot = working.entry(table.to_string()).or_insert_with(|| Working {
            table: self.tables.get(table).map(|t| t.clone()).unwrap_or_default(),
            dirty: false,
        });
        f(slot)
    }

    fn read<T>(&self, table: &str, f: impl FnOnce(&MemTable) -> T) -> T {
        self.with_working(table, |w| f(&w.table))
    }

    fn write<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.with_working(table, |w| {
            let mut copy = w.table.clone();
            let out = f(&mut copy)?;
            w.table = copy;
            w.dirty = true;
            Ok(out)
        })
    }
}

#[async_trait]
impl RowExecutor for MemoryTransaction {
    async fn fetch(&self, schema: &TableSchema, query: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        Ok(self.read(schema.table(), |t| select(t, query)))
    }

    async fn count(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        Ok(self.read(schema.table(), |t| count(t, filter)))
    }

    async fn insert(&self, schema: &TableSchema, row: &Row) -> Result<Option<i64>, StorageError> {
        self.write(schema.table(), |t| insert(t, schema, row))
    }

    async fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| insert_many(t, schema, rows))
    }

    async fn update(&self, schema: &TableSchema, filter: &Predicate, changes: &Row) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| update(t, schema, filter, changes))
    }

    async fn delete(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| Ok(delete(t, filter)))
    }

    async fn upsert(&self, schema: &TableSchema, upsert: &Upsert) -> Result<u64, StorageError> {
        self.write(schema.table(), |t| apply_upsert(t, schema, upsert))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        for (name, working) in self.working.into_inner() {
            if working.dirty {
                self.tables.insert(name, working.table);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }

    fn as_executor(&self) -> &dyn RowExecutor {
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Table operations
// ═══════════════════════════════════════════════════════════════════════════

fn matching<'a>(table: &'a MemTable, filter: Option<&'a Predicate>) -> impl Iterator<Item = &'a Row> {
    table
        .rows
        .iter()
        .filter(move |row| filter.map_or(true, |p| p.matches(row)))
}

fn select(table: &MemTable, query: &SelectQuery) -> Vec<Row> {
    let mut rows: Vec<Row> = matching(table, query.filter.as_ref()).cloned().collect();

    if !query.order.is_empty() {
        rows.sort_by(|a, b| compare_rows(a, b, &query.order));
    }

    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map_or(usize::MAX, |l| l as usize);
    let columns: Vec<&str> = query.columns.iter().map(|c| unqualified(c)).collect();

    rows.into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| if columns.is_empty() { row } else { row.pick(&columns) })
        .collect()
}

/// NULL sorts first ascending, as in MySQL and SQLite.
fn compare_rows(a: &Row, b: &Row, order: &[(String, SortOrder)]) -> Ordering {
    for (column, direction) in order {
        let column = unqualified(column);
        let x = a.get(column).unwrap_or(&NULL);
        let y = b.get(column).unwrap_or(&NULL);
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.compare(y).unwrap_or(Ordering::Equal),
        };
        let ordering = match direction {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn count(table: &MemTable, filter: Option<&Predicate>) -> u64 {
    matching(table, filter).count() as u64
}

fn same_key(a: &Row, b: &Row, columns: &[&str]) -> bool {
    columns.iter().all(|c| {
        let x = a.get(c).unwrap_or(&NULL);
        let y = b.get(c).unwrap_or(&NULL);
        x.compare(y) == Some(Ordering::Equal)
    })
}

/// Primary key and composite key must be unique among stored rows.
fn check_unique(table: &MemTable, schema: &TableSchema, row: &Row, skip: Option<usize>) -> Result<(), StorageError> {
    let pk = [schema.primary_key()];
    let composite: Vec<&str> = schema.composite_key_columns().iter().map(String::as_str).collect();

    for key in [&pk[..], &composite[..]] {
        if key.is_empty() || key.iter().any(|c| row.get_non_null(c).is_none()) {
            continue;
        }
        let clash = table
            .rows
            .iter()
            .enumerate()
            .any(|(i, existing)| Some(i) != skip && same_key(existing, row, key));
        if clash {
            let shown = key
                .iter()
                .filter_map(|c| row.get(c))
                .map(|v| v.to_json().to_string())
                .collect::<Vec<_>>()
                .join("-");
            return Err(StorageError::DuplicateKey {
                table: schema.table().to_string(),
                key: shown,
            });
        }
    }
    Ok(())
}

fn insert(table: &mut MemTable, schema: &TableSchema, row: &Row) -> Result<Option<i64>, StorageError> {
    let mut stored: Row = schema
        .column_names()
        .into_iter()
        .map(|c| (c.to_string(), Value::Null))
        .collect();
    stored.merge(row);

    let pk = schema.primary_key();
    let generated = if schema.key_strategy() == KeyStrategy::AutoIncrement {
        match stored.get_non_null(pk).and_then(Value::as_i64) {
            Some(id) => {
                table.last_id = table.last_id.max(id);
                Some(id)
            }
            None => {
                table.last_id += 1;
                stored.set(pk, table.last_id);
                Some(table.last_id)
            }
        }
    } else {
        None
    };

    check_unique(table, schema, &stored, None)?;
    table.rows.push(stored);
    Ok(generated)
}

fn insert_many(table: &mut MemTable, schema: &TableSchema, rows: &[Row]) -> Result<u64, StorageError> {
    for row in rows {
        insert(table, schema, row)?;
    }
    Ok(rows.len() as u64)
}

fn update(table: &mut MemTable, schema: &TableSchema, filter: &Predicate, changes: &Row) -> Result<u64, StorageError> {
    let targets: Vec<usize> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| filter.matches(row))
        .map(|(i, _)| i)
        .collect();

    for &i in &targets {
        let mut updated = table.rows[i].clone();
        updated.merge(changes);
        check_unique(table, schema, &updated, Some(i))?;
        table.rows[i] = updated;
    }
    Ok(targets.len() as u64)
}

fn delete(table: &mut MemTable, filter: Option<&Predicate>) -> u64 {
    let before = table.rows.len();
    table.rows.retain(|row| !filter.map_or(true, |p| p.matches(row)));
    (before - table.rows.len()) as u64
}

fn apply_upsert(table: &mut MemTable, schema: &TableSchema, upsert: &Upsert) -> Result<u64, StorageError> {
    let conflict: Vec<&str> = upsert.conflict_columns.iter().map(String::as_str).collect();

    for values in &upsert.rows {
        let row: Row = upsert.columns.iter().cloned().zip(values.iter().cloned()).collect();
        let existing = table.rows.iter().position(|r| same_key(r, &row, &conflict));
        match existing {
            Some(i) => {
                let changes = row.pick(&upsert.update_columns.iter().map(String::as_str).collect::<Vec<_>>());
                let mut updated = table.rows[i].clone();
                updated.merge(&changes);
                check_unique(table, schema, &updated, Some(i))?;
                table.rows[i] = updated;
            }
            None => {
                insert(table, schema, &row)?;
            }
        }
    }
    Ok(upsert.rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column("id", ColumnType::Integer)
            .column("email", ColumnType::Text)
            .column("balance", ColumnType::Integer)
            .composite_key(&["email"])
    }

    fn user(email: &str, balance: i64) -> Row {
        Row::new().with("email", email).with("balance", balance)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty("users"));
        assert_eq!(store.count(&users(), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_fills_columns() {
        let store = MemoryStore::new();
        let schema = users();
        assert_eq!(store.insert(&schema, &user("a@x.com", 1)).await.unwrap(), Some(1));
        assert_eq!(store.insert(&schema, &Row::new()).await.unwrap(), Some(2));

        let rows = store.rows("users");
        assert_eq!(rows[1].get("email"), Some(&Value::Null));
        assert_eq!(rows[1].get("id"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_duplicate_composite_key_rejected() {
        let store = MemoryStore::new();
        let schema = users();
        store.insert(&schema, &user("a@x.com", 1)).await.unwrap();
        let err = store.insert(&schema, &user("a@x.com", 2)).await.unwrap_err();
        assert_eq!(err.code(), Some("ER_DUP_ENTRY"));
        assert_eq!(store.len("users"), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_table_untouched() {
        let store = MemoryStore::new();
        let schema = users();
        let rows = vec![user("a@x.com", 1), user("a@x.com", 2)];
        assert!(store.insert_many(&schema, &rows).await.is_err());
        assert!(store.is_empty("users"));
    }

    #[tokio::test]
    async fn test_select_orders_and_pages() {
        let store = MemoryStore::new();
        let schema = users();
        for (email, balance) in [("a", 3), ("b", 1), ("c", 2)] {
            store.insert(&schema, &user(email, balance)).await.unwrap();
        }
        let query = SelectQuery {
            columns: vec!["users.email".into()],
            order: vec![("balance".into(), SortOrder::Desc)],
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let rows = store.fetch(&schema, &query).await.unwrap();
        let emails: Vec<_> = rows.iter().map(|r| r.get("email").unwrap().clone()).collect();
        assert_eq!(emails, vec![Value::from("c"), Value::from("b")]);
        assert_eq!(rows[0].len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_one_empty_result() {
        let store = MemoryStore::new();
        let err = store
            .fetch_one(&users(), &SelectQuery::filtered(Some(Predicate::eq("id", 1))))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EmptyResult));
    }

    #[tokio::test]
    async fn test_upsert_updates_only_listed_columns() {
        let store = MemoryStore::new();
        let schema = users();
        store.insert(&schema, &user("a", 1)).await.unwrap();
        let upsert = Upsert {
            columns: vec!["id".into(), "email".into(), "balance".into()],
            rows: vec![
                vec![Value::Int(1), Value::from("ignored"), Value::Int(10)],
                vec![Value::Int(5), Value::from("new"), Value::Int(5)],
            ],
            conflict_columns: vec!["id".into()],
            update_columns: vec!["balance".into()],
        };
        store.upsert(&schema, &upsert).await.unwrap();

        let rows = store.rows("users");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("email"), Some(&Value::from("a")));
        assert_eq!(rows[0].get("balance"), Some(&Value::Int(10)));
        assert_eq!(rows[1].get("id"), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let store = MemoryStore::new();
        let schema = users();

        let tx = store.begin().await.unwrap();
        tx.insert(&schema, &user("a", 1)).await.unwrap();
        assert_eq!(tx.count(&schema, None).await.unwrap(), 1);
        assert!(store.is_empty("users"));
        tx.rollback().await.unwrap();
        assert!(store.is_empty("users"));

        let tx = store.begin().await.unwrap();
        tx.insert(&schema, &user("a", 1)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.len("users"), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_by_predicate() {
        let store = MemoryStore::new();
        let schema = users();
        for (email, balance) in [("a", 1), ("b", 2), ("c", 3)] {
            store.insert(&schema, &user(email, balance)).await.unwrap();
        }
        let rich = Predicate::compare("users.balance", crate::filter::CompareOp::Gte, 2);
        let changed = store
            .update(&schema, &rich, &Row::new().with("balance", 0))
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(store.delete(&schema, Some(&Predicate::eq("balance", 0))).await.unwrap(), 2);
        assert_eq!(store.len("users"), 1);
    }
}
