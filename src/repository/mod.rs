// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table-level operations.
//!
//! A [`Repository`] pairs one [`TableSchema`] with a [`RowStore`] and exposes
//! the list, CRUD, bulk and import operations over it. Callers speak in
//! external form (identifiers as prefixed strings); the repository converts
//! to and from stored form at the storage boundary.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modelbase::schema::{ColumnType, TableSchema};
//! use modelbase::storage::memory::MemoryStore;
//! use modelbase::Repository;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), modelbase::ModelError> {
//! let schema = TableSchema::new("users")
//!     .column("id", ColumnType::Integer)
//!     .column("email", ColumnType::Text);
//! let users = Repository::new(schema, Arc::new(MemoryStore::new()));
//!
//! let created = users
//!     .create_one(json!({"email": "ann@example.com"}).as_object().unwrap(), &["email"])
//!     .await?;
//! let page = users.list(json!({}).as_object().unwrap(), &["id", "email"]).await?;
//! assert_eq!(page.rows.len(), 1);
//! # let _ = created;
//! # Ok(())
//! # }
//! ```

mod bulk;
mod crud;
mod import;
mod list;
mod types;

pub use bulk::{diff_rows, SyncPlan};
pub use types::{
    BulkInsertOptions, BulkUpdateOptions, Matcher, Model, Page, Pagination, SyncOptions, SyncResult,
};

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::config::ModelbaseConfig;
use crate::error::ModelError;
use crate::events::{EventBus, ImportEvent};
use crate::filter::Predicate;
use crate::metrics;
use crate::schema::{KeyStrategy, TableSchema};
use crate::storage::traits::{RowExecutor, RowStore, SelectQuery, StoreTransaction};
use crate::validation::ValidationContext;
use crate::value::{now_millis, Row, Value};

#[derive(Clone)]
pub struct Repository {
    schema: Arc<TableSchema>,
    store: Arc<dyn RowStore>,
    events: EventBus,
    page_size: u64,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.schema.table())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Repository {
    /// Repository with default configuration.
    pub fn new(schema: TableSchema, store: Arc<dyn RowStore>) -> Self {
        Self::with_config(schema, store, &ModelbaseConfig::default())
    }

    pub fn with_config(schema: TableSchema, store: Arc<dyn RowStore>, config: &ModelbaseConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            store,
            events: EventBus::new(config.event_capacity),
            page_size: config.default_page_size.max(1),
        }
    }

    /// Replace the event bus, e.g. to share one across repositories.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.events.subscribe()
    }

    fn table(&self) -> &str {
        self.schema.table()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Shared plumbing
    // ═══════════════════════════════════════════════════════════════════════

    /// Commit on success, roll back on failure.
    async fn finish<T>(
        &self,
        tx: Box<dyn StoreTransaction>,
        operation: &'static str,
        result: Result<T, ModelError>,
    ) -> Result<T, ModelError> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                metrics::record_rollback(self.table(), operation);
                if let Err(rollback) = tx.rollback().await {
                    warn!(table = %self.table(), operation, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Record the outcome of a public operation.
    fn observe<T>(&self, operation: &'static str, result: Result<T, ModelError>) -> Result<T, ModelError> {
        metrics::record_operation(self.table(), operation, metrics::status_of(&result));
        result
    }

    fn validate(&self, row: Row, ctx: &ValidationContext) -> Result<Row, ModelError> {
        self.schema.validate(row, ctx).map_err(|violations| {
            metrics::record_validation_failure(self.table(), violations.len());
            ModelError::Validation(violations)
        })
    }

    /// Restrict `filter` to rows that are not soft-deleted.
    fn alive(&self, filter: Predicate) -> Predicate {
        match self.schema.soft_delete_column() {
            Some(column) => filter.and(Predicate::is_null(self.schema.qualify(column))),
            None => filter,
        }
    }

    fn live(&self, filter: Option<Predicate>) -> Option<Predicate> {
        match (filter, self.schema.soft_delete_column()) {
            (Some(f), _) => Some(self.alive(f)),
            (None, Some(column)) => Some(Predicate::is_null(self.schema.qualify(column))),
            (None, None) => None,
        }
    }

    /// `pk = id`, with the id encoded for storage.
    fn key_predicate(&self, id: Value) -> Result<Predicate, ModelError> {
        let pk = self.schema.primary_key();
        if id.is_null() {
            return Err(ModelError::Validation(vec![format!("\"{}\" is required", pk)]));
        }
        Ok(Predicate::eq(self.schema.qualify(pk), self.schema.storage_value(pk, id)?))
    }

    /// Equality on every composite key column; all of them must be present.
    fn composite_predicate(&self, key: &Row) -> Result<Predicate, ModelError> {
        let columns = self.schema.composite_key_columns();
        if columns.is_empty() {
            return Err(ModelError::Config(format!(
                "table '{}' has no composite key",
                self.table()
            )));
        }

        let mut missing = Vec::new();
        let mut parts = Vec::with_capacity(columns.len());
        for column in columns {
            match key.get_non_null(column) {
                Some(v) => parts.push(Predicate::eq(
                    self.schema.qualify(column),
                    self.schema.storage_value(column, v.clone())?,
                )),
                None => missing.push(format!("\"{}\" is required", column)),
            }
        }
        if !missing.is_empty() {
            return Err(ModelError::Validation(missing));
        }
        Predicate::all(parts).ok_or(ModelError::NotFound)
    }

    /// `pk IN (...)` over external ids.
    fn keys_predicate(&self, ids: &[Value]) -> Result<Predicate, ModelError> {
        let pk = self.schema.primary_key();
        let stored = ids
            .iter()
            .map(|id| self.schema.storage_value(pk, id.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Predicate::in_list(self.schema.qualify(pk), stored))
    }

    /// Single row in external form; `NotFound` when nothing matches.
    async fn fetch_external(&self, exec: &dyn RowExecutor, filter: Predicate) -> Result<Row, ModelError> {
        let row = exec
            .fetch_one(&self.schema, &SelectQuery::filtered(Some(filter)))
            .await?;
        self.schema.to_external(row)
    }

    /// Delete, or stamp the soft-delete column when the table has one.
    async fn remove(&self, exec: &dyn RowExecutor, filter: Predicate) -> Result<u64, ModelError> {
        let removed = match self.schema.soft_delete_column() {
            Some(column) => {
                let stamp = Row::new().with(column, now_millis());
                exec.update(&self.schema, &filter, &stamp).await?
            }
            None => exec.delete(&self.schema, Some(&filter)).await?,
        };
        metrics::record_rows_written(self.table(), "destroyed", removed as usize);
        Ok(removed)
    }

    /// Fill `created_at`/`updated_at` and a generated key where needed.
    fn prepare_insert(&self, mut row: Row) -> Row {
        if self.schema.has_timestamps() {
            let now = now_millis();
            for column in [self.schema.created_at_column(), self.schema.updated_at_column()]
                .into_iter()
                .flatten()
            {
                row.set(column, now);
            }
        }
        let pk = self.schema.primary_key();
        if self.schema.key_strategy() == KeyStrategy::OrderedUuid && row.get_non_null(pk).is_none() {
            if let Some(codec) = self.schema.codec(pk) {
                row.set(pk, codec.generate());
            }
        }
        row
    }

    fn touch(&self, row: &mut Row) {
        if let Some(column) = self.schema.updated_at_column() {
            row.set(column, now_millis());
        }
    }
}

/// Reject an empty allow-list.
fn check_columns(columns: &[&str]) -> Result<(), ModelError> {
    if columns.is_empty() {
        return Err(ModelError::columns());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use crate::storage::memory::MemoryStore;

    fn repo(schema: TableSchema) -> Repository {
        Repository::new(schema, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_check_columns() {
        assert_eq!(check_columns(&[]).unwrap_err().code(), "CONFIG_ERROR");
        assert!(check_columns(&["id"]).is_ok());
    }

    #[test]
    fn test_live_adds_soft_delete_guard() {
        let plain = repo(TableSchema::new("users").column("id", ColumnType::Integer));
        assert!(plain.live(None).is_none());

        let soft = repo(
            TableSchema::new("users")
                .column("id", ColumnType::Integer)
                .column("deleted_at", ColumnType::Timestamp)
                .soft_delete("deleted_at"),
        );
        let filter = soft.live(None).unwrap();
        assert!(filter.matches(&Row::new().with("deleted_at", Value::Null)));
        assert!(!filter.matches(&Row::new().with("deleted_at", 5)));
    }

    #[test]
    fn test_composite_predicate_requires_every_column() {
        let r = repo(
            TableSchema::new("budgets")
                .column("id", ColumnType::Integer)
                .column("type", ColumnType::Text)
                .column("year", ColumnType::Integer)
                .composite_key(&["type", "year"]),
        );

        let err = r.composite_predicate(&Row::new().with("type", "food")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let filter = r
            .composite_predicate(&Row::new().with("type", "food").with("year", 2024))
            .unwrap();
        assert!(filter.matches(&Row::new().with("type", "food").with("year", 2024)));
    }

    #[test]
    fn test_composite_predicate_without_composite_key() {
        let r = repo(TableSchema::new("users").column("id", ColumnType::Integer));
        assert_eq!(r.composite_predicate(&Row::new()).unwrap_err().code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_prepare_insert_generates_ordered_ids() {
        let r = repo(
            TableSchema::new("budgets")
                .column("id", ColumnType::Binary)
                .column("created_at", ColumnType::Timestamp)
                .column("updated_at", ColumnType::Timestamp)
                .ordered_uuid("id", "BU")
                .timestamps(),
        );
        let row = r.prepare_insert(Row::new());
        assert!(row.get("id").and_then(Value::as_str).unwrap().starts_with("BU"));
        assert!(row.get_non_null("created_at").is_some());
        assert_eq!(row.get("created_at"), row.get("updated_at"));
    }

    #[test]
    fn test_key_predicate_rejects_null() {
        let r = repo(TableSchema::new("users").column("id", ColumnType::Integer));
        assert!(r.key_predicate(Value::Null).is_err());
        assert!(r.key_predicate(Value::Int(1)).unwrap().matches(&Row::new().with("id", 1)));
    }
}
