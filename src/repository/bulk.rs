// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk writes and collection synchronization.
//!
//! [`diff_rows`] is the pure half of a sync: it partitions the desired rows
//! against the existing ones. [`Repository::bulk_sync`] then runs the insert,
//! update and destroy phases concurrently on one transaction.
//!
//! ```
//! use modelbase::repository::diff_rows;
//! use modelbase::schema::{ColumnType, TableSchema};
//! use modelbase::Row;
//!
//! let schema = TableSchema::new("users")
//!     .column("id", ColumnType::Integer)
//!     .column("name", ColumnType::Text);
//! let existing = vec![
//!     Row::new().with("id", 1).with("name", "Ann"),
//!     Row::new().with("id", 2).with("name", "Bob"),
//! ];
//! let desired = vec![
//!     Row::new().with("id", 1).with("name", "Anne"),
//!     Row::new().with("name", "Cid"),
//! ];
//!
//! let plan = diff_rows(&schema, &existing, &desired, &["name"], None);
//! assert_eq!(plan.inserted.len(), 1);
//! assert_eq!(plan.updated.len(), 1);
//! assert_eq!(plan.destroyed.len(), 1);
//! assert!(plan.unchanged.is_empty());
//! ```

use futures::future::try_join_all;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use super::{
    check_columns, BulkInsertOptions, BulkUpdateOptions, Matcher, Model, Repository, SyncOptions,
    SyncResult,
};
use crate::error::ModelError;
use crate::filter::{compile, group_by_columns};
use crate::metrics::{self, LatencyTimer};
use crate::schema::{KeyStrategy, TableSchema};
use crate::storage::traits::{RowExecutor, SelectQuery, Upsert};
use crate::validation::ValidationContext;
use crate::value::{Row, Value};

static NULL: Value = Value::Null;

/// Partition of a sync, before anything is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub inserted: Vec<Row>,
    /// `(new values, existing row)`.
    pub updated: Vec<(Row, Row)>,
    pub destroyed: Vec<Row>,
    pub unchanged: Vec<Row>,
}

/// Diff `desired` against `existing`.
///
/// Each desired row claims the first remaining existing row it matches
/// (primary key equality unless `is_match` is given). Claimed rows are
/// compared on `columns`, ignoring key and bookkeeping columns; unclaimed
/// existing rows are destroyed.
#[must_use]
pub fn diff_rows(
    schema: &TableSchema,
    existing: &[Row],
    desired: &[Row],
    columns: &[&str],
    is_match: Option<&Matcher>,
) -> SyncPlan {
    let pk = schema.primary_key();
    let compared: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !schema.is_meta_column(c))
        .collect();

    let mut pool: Vec<&Row> = existing.iter().collect();
    let mut plan = SyncPlan::default();

    for wanted in desired {
        let claimed = pool.iter().position(|&have| match is_match {
            Some(matcher) => matcher(have, wanted),
            None => same_key(have, wanted, pk),
        });

        let Some(index) = claimed else {
            plan.inserted.push(wanted.clone());
            continue;
        };
        let have = pool.remove(index);

        let differs = compared.iter().any(|c| match wanted.get(c) {
            Some(v) => !have.get(c).unwrap_or(&NULL).same_as(v),
            None => false,
        });
        if differs {
            let mut next = have.clone();
            next.merge(&wanted.pick(&compared));
            plan.updated.push((next, have.clone()));
        } else {
            plan.unchanged.push(have.clone());
        }
    }

    plan.destroyed = pool.into_iter().cloned().collect();
    plan
}

fn same_key(a: &Row, b: &Row, pk: &str) -> bool {
    match (a.get_non_null(pk), b.get_non_null(pk)) {
        (Some(x), Some(y)) => x.same_as(y),
        _ => false,
    }
}

impl Repository {
    // ═══════════════════════════════════════════════════════════════════════
    // Public bulk operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate every row, then insert them all in one transaction.
    ///
    /// Any invalid row fails the whole batch with one aggregated
    /// `VALIDATION_ERROR` before anything is written.
    #[tracing::instrument(skip(self, rows), fields(table = %self.table(), rows = rows.len()))]
    pub async fn bulk_insert(&self, rows: Vec<Row>, options: BulkInsertOptions) -> Result<Vec<Row>, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "bulk_insert");
        let result: Result<Vec<Row>, ModelError> = async {
            if options.return_rows
                && options.concurrent
                && self.schema.key_strategy() == KeyStrategy::AutoIncrement
            {
                return Err(ModelError::Config(format!(
                    "cannot return rows from concurrent inserts into auto-increment table '{}'",
                    self.table()
                )));
            }
            let prepared = self.prepare_inserts(rows)?;
            if prepared.is_empty() {
                return Ok(prepared);
            }

            let tx = self.store.begin().await?;
            let outcome = self.write_inserts(tx.as_executor(), prepared, options).await;
            self.finish(tx, "bulk_insert", outcome).await
        }
        .await;
        self.observe("bulk_insert", result)
    }

    /// Merge each row over its counterpart in `registry` (rows fetched
    /// earlier, matched by primary key) and write them with one upsert.
    /// Rows without a counterpart are written as new rows.
    #[tracing::instrument(skip(self, rows, registry, options), fields(table = %self.table(), rows = rows.len()))]
    pub async fn bulk_update(
        &self,
        rows: &[Row],
        registry: &[Row],
        options: BulkUpdateOptions,
    ) -> Result<u64, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "bulk_update");
        let result: Result<u64, ModelError> = async {
            let pk = self.schema.primary_key();
            let prepared = self.prepare_updates(
                rows.iter()
                    .map(|row| (row, registry.iter().find(|have| same_key(have, row, pk)))),
            )?;
            self.write_upsert(self.store.as_executor(), &prepared, &options).await
        }
        .await;
        self.observe("bulk_update", result)
    }

    /// Fetch the current rows for these keys, merge, and upsert, all in one
    /// transaction.
    #[tracing::instrument(skip(self, rows, options), fields(table = %self.table(), rows = rows.len()))]
    pub async fn bulk_upsert(&self, rows: &[Row], options: BulkUpdateOptions) -> Result<u64, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "bulk_upsert");
        let result: Result<u64, ModelError> = async {
            if rows.is_empty() {
                return Ok(0);
            }
            let pk = self.schema.primary_key();
            let keys: Vec<Value> = rows.iter().filter_map(|r| r.get_non_null(pk).cloned()).collect();

            let tx = self.store.begin().await?;
            let outcome: Result<u64, ModelError> = async {
                let registry = if keys.is_empty() {
                    Vec::new()
                } else {
                    let query = SelectQuery::filtered(Some(self.keys_predicate(&keys)?));
                    tx.fetch(&self.schema, &query)
                        .await?
                        .into_iter()
                        .map(|row| self.schema.to_external(row))
                        .collect::<Result<Vec<_>, _>>()?
                };
                let prepared = self.prepare_updates(
                    rows.iter()
                        .map(|row| (row, registry.iter().find(|have| same_key(have, row, pk)))),
                )?;
                self.write_upsert(tx.as_executor(), &prepared, &options).await
            }
            .await;
            self.finish(tx, "bulk_upsert", outcome).await
        }
        .await;
        self.observe("bulk_upsert", result)
    }

    /// Remove every row matching the filter object. An empty filter is an
    /// `EMPTY_REQUEST`.
    #[tracing::instrument(skip(self, options), fields(table = %self.table()))]
    pub async fn bulk_destroy(&self, options: &Map<String, JsonValue>, columns: &[&str]) -> Result<u64, ModelError> {
        let result: Result<u64, ModelError> = async {
            check_columns(columns)?;
            let filter = compile(&self.schema, options, columns)?.ok_or(ModelError::EmptyRequest)?;
            self.remove(self.store.as_executor(), self.alive(filter)).await
        }
        .await;
        self.observe("bulk_destroy", result)
    }

    /// Remove the rows with these primary keys.
    #[tracing::instrument(skip(self, ids), fields(table = %self.table(), ids = ids.len()))]
    pub async fn bulk_destroy_in(&self, ids: &[Value]) -> Result<u64, ModelError> {
        let result: Result<u64, ModelError> = async {
            if ids.is_empty() {
                return Ok(0);
            }
            let filter = self.keys_predicate(ids)?;
            self.remove(self.store.as_executor(), self.alive(filter)).await
        }
        .await;
        self.observe("bulk_destroy_in", result)
    }

    /// Make the table's `existing` rows look like `desired`.
    ///
    /// Inserts, updates and destroys run concurrently on one transaction; a
    /// failure in any phase rolls back all of them. Suppressed phases are
    /// reported empty.
    #[tracing::instrument(
        skip(self, existing, desired, options),
        fields(table = %self.table(), existing = existing.len(), desired = desired.len())
    )]
    pub async fn bulk_sync(
        &self,
        existing: &[Row],
        desired: &[Row],
        columns: &[&str],
        options: SyncOptions,
    ) -> Result<SyncResult, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "bulk_sync");
        let result = self.sync_inner(existing, desired, columns, options).await;
        self.observe("bulk_sync", result)
    }

    async fn sync_inner(
        &self,
        existing: &[Row],
        desired: &[Row],
        columns: &[&str],
        options: SyncOptions,
    ) -> Result<SyncResult, ModelError> {
        check_columns(columns)?;

        let plan = diff_rows(&self.schema, existing, desired, columns, options.is_match.as_ref());
        for (partition, count) in [
            ("inserted", plan.inserted.len()),
            ("updated", plan.updated.len()),
            ("destroyed", plan.destroyed.len()),
            ("unchanged", plan.unchanged.len()),
        ] {
            metrics::record_sync_partition(self.table(), partition, count);
        }
        debug!(
            inserted = plan.inserted.len(),
            updated = plan.updated.len(),
            destroyed = plan.destroyed.len(),
            unchanged = plan.unchanged.len(),
            "Sync plan"
        );

        // Everything is validated before the transaction opens.
        let inserts = if options.no_insert {
            Vec::new()
        } else {
            self.prepare_inserts(plan.inserted)?
        };
        let updates = if options.no_update {
            Vec::new()
        } else {
            plan.updated
        };
        let update_rows = self.prepare_updates(updates.iter().map(|(next, have)| (next, Some(have))))?;
        let destroyed = if options.no_destroy {
            Vec::new()
        } else {
            plan.destroyed
        };

        let tx = self.store.begin().await?;
        let outcome: Result<Vec<Row>, ModelError> = async {
            let exec = tx.as_executor();
            let insert_options = BulkInsertOptions {
                return_rows: false,
                concurrent: true,
            };
            let update_options = BulkUpdateOptions::default();
            let (inserted, _, _) = tokio::try_join!(
                self.write_inserts(exec, inserts, insert_options),
                self.write_upsert(exec, &update_rows, &update_options),
                self.write_destroy(exec, &destroyed),
            )?;
            Ok(inserted)
        }
        .await;
        let inserted = self.finish(tx, "bulk_sync", outcome).await?;

        let updated: Vec<Model> = update_rows
            .into_iter()
            .zip(updates)
            .map(|(next, (_, have))| Model::updated(next, have))
            .collect();

        info!(
            inserted = inserted.len(),
            updated = updated.len(),
            destroyed = destroyed.len(),
            "Sync committed"
        );
        Ok(SyncResult {
            inserted,
            updated,
            destroyed,
            unchanged: plan.unchanged,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Phases
    // ═══════════════════════════════════════════════════════════════════════

    /// Fill and validate rows for insertion, collecting every violation as
    /// `row N: message`.
    fn prepare_inserts(&self, rows: Vec<Row>) -> Result<Vec<Row>, ModelError> {
        let mut prepared = Vec::with_capacity(rows.len());
        let mut violations = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            let row = self.prepare_insert(self.known_columns(row));
            match self.schema.validate(row, &ValidationContext::insert()) {
                Ok(row) => prepared.push(row),
                Err(errors) => violations.extend(errors.into_iter().map(|e| format!("row {}: {}", index, e))),
            }
        }
        self.reject(violations)?;
        Ok(prepared)
    }

    /// Merge each row over its previous version and validate the result.
    /// Rows with no previous version are prepared as inserts.
    fn prepare_updates<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a Row, Option<&'a Row>)>,
    ) -> Result<Vec<Row>, ModelError> {
        let mut prepared = Vec::new();
        let mut violations = Vec::new();
        for (index, (row, previous)) in pairs.into_iter().enumerate() {
            let outcome = match previous {
                Some(previous) => {
                    let mut merged = previous.clone();
                    merged.merge(row);
                    self.schema
                        .validate(self.known_columns(merged), &ValidationContext::update(false))
                        .map(|mut merged| {
                            self.touch(&mut merged);
                            merged
                        })
                }
                None => self.schema.validate(
                    self.prepare_insert(self.known_columns(row.clone())),
                    &ValidationContext::insert(),
                ),
            };
            match outcome {
                Ok(row) => prepared.push(row),
                Err(errors) => violations.extend(errors.into_iter().map(|e| format!("row {}: {}", index, e))),
            }
        }
        self.reject(violations)?;
        Ok(prepared)
    }

    fn reject(&self, violations: Vec<String>) -> Result<(), ModelError> {
        if violations.is_empty() {
            return Ok(());
        }
        metrics::record_validation_failure(self.table(), violations.len());
        Err(ModelError::Validation(violations))
    }

    fn known_columns(&self, row: Row) -> Row {
        row.into_iter().filter(|(k, _)| self.schema.has_column(k)).collect()
    }

    /// Insert prepared rows; returns them with generated keys filled in, or
    /// re-selected from storage when `return_rows` is set.
    async fn write_inserts(
        &self,
        exec: &dyn RowExecutor,
        mut rows: Vec<Row>,
        options: BulkInsertOptions,
    ) -> Result<Vec<Row>, ModelError> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let stored = rows
            .iter()
            .map(|row| self.schema.to_storage(row))
            .collect::<Result<Vec<_>, _>>()?;
        let pk = self.schema.primary_key();

        if options.concurrent || options.return_rows {
            let ids = if options.concurrent {
                try_join_all(stored.iter().map(|row| exec.insert(&self.schema, row))).await?
            } else {
                let mut ids = Vec::with_capacity(stored.len());
                for row in &stored {
                    ids.push(exec.insert(&self.schema, row).await?);
                }
                ids
            };
            for (row, id) in rows.iter_mut().zip(ids) {
                if let Some(id) = id {
                    row.set(pk, id);
                }
            }
        } else {
            exec.insert_many(&self.schema, &stored).await?;
        }
        metrics::record_rows_written(self.table(), "inserted", rows.len());

        if !options.return_rows {
            return Ok(rows);
        }

        let keys: Vec<Value> = rows.iter().filter_map(|r| r.get_non_null(pk).cloned()).collect();
        let query = SelectQuery::filtered(Some(self.keys_predicate(&keys)?));
        let mut fetched = exec
            .fetch(&self.schema, &query)
            .await?
            .into_iter()
            .map(|row| self.schema.to_external(row))
            .collect::<Result<Vec<_>, _>>()?;
        // Input order.
        fetched.sort_by_key(|row| {
            keys.iter()
                .position(|k| row.get(pk).is_some_and(|v| v.same_as(k)))
                .unwrap_or(usize::MAX)
        });
        Ok(fetched)
    }

    /// Multi-row upserts, one per set of columns the rows carry, so an
    /// omitted column keeps its stored value. Column order follows the
    /// schema; key, `created_at` and version columns are only rewritten when
    /// included.
    async fn write_upsert(
        &self,
        exec: &dyn RowExecutor,
        rows: &[Row],
        options: &BulkUpdateOptions,
    ) -> Result<u64, ModelError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let stored = rows
            .iter()
            .map(|row| self.schema.to_storage(row))
            .collect::<Result<Vec<_>, _>>()?;

        let pk = self.schema.primary_key();
        let frozen = |c: &str| {
            c == pk
                || self.schema.created_at_column() == Some(c)
                || self.schema.version_column_name() == Some(c)
        };

        for group in group_by_columns(&stored) {
            let columns: Vec<String> = self
                .schema
                .column_names()
                .into_iter()
                .filter(|c| group[0].contains(c))
                .map(String::from)
                .collect();
            if columns.is_empty() {
                continue;
            }
            let update_columns = columns
                .iter()
                .filter(|c| options.include.iter().any(|i| i == *c) || !frozen(c.as_str()))
                .cloned()
                .collect();
            let values = group
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect();

            let upsert = Upsert {
                columns,
                rows: values,
                conflict_columns: vec![pk.to_string()],
                update_columns,
            };
            exec.upsert(&self.schema, &upsert).await?;
        }
        metrics::record_rows_written(self.table(), "updated", rows.len());
        Ok(rows.len() as u64)
    }

    async fn write_destroy(&self, exec: &dyn RowExecutor, rows: &[Row]) -> Result<u64, ModelError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let pk = self.schema.primary_key();
        let ids = rows
            .iter()
            .map(|row| {
                row.get_non_null(pk).cloned().ok_or_else(|| {
                    ModelError::Config(format!("cannot destroy a '{}' row without \"{}\"", self.table(), pk))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.remove(exec, self.keys_predicate(&ids)?).await
    }
}
