// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-row operations.

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use super::{check_columns, Model, Repository};
use crate::error::ModelError;
use crate::filter::{compile, Predicate};
use crate::metrics::{self, LatencyTimer};
use crate::validation::ValidationContext;
use crate::value::{Row, Value};

impl Repository {
    // ═══════════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════════

    #[tracing::instrument(skip(self, id), fields(table = %self.table()))]
    pub async fn find_by_id(&self, id: impl Into<Value>) -> Result<Model, ModelError> {
        let result: Result<Model, ModelError> = async {
            let filter = self.alive(self.key_predicate(id.into())?);
            let row = self.fetch_external(self.store.as_executor(), filter).await?;
            Ok(Model::fetched(row))
        }
        .await;
        self.observe("find_by_id", result)
    }

    /// Look a row up by its composite key columns (external form).
    #[tracing::instrument(skip(self, key), fields(table = %self.table()))]
    pub async fn find_by_composite_key(&self, key: &Row) -> Result<Model, ModelError> {
        let result: Result<Model, ModelError> = async {
            let filter = self.alive(self.composite_predicate(key)?);
            let row = self.fetch_external(self.store.as_executor(), filter).await?;
            Ok(Model::fetched(row))
        }
        .await;
        self.observe("find_by_composite_key", result)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Create
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert one row built from the `columns` of `input` and return it as
    /// stored. An input with none of those columns still inserts a row of
    /// defaults.
    #[tracing::instrument(skip(self, input), fields(table = %self.table()))]
    pub async fn create_one(&self, input: &Map<String, JsonValue>, columns: &[&str]) -> Result<Model, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "create_one");
        let result = self.create_inner(input, columns).await;
        self.observe("create_one", result)
    }

    async fn create_inner(&self, input: &Map<String, JsonValue>, columns: &[&str]) -> Result<Model, ModelError> {
        check_columns(columns)?;

        let row = self.prepare_insert(self.schema.row_from_json(input, columns));
        let row = self.validate(row, &ValidationContext::insert())?;
        let stored = self.schema.to_storage(&row)?;

        let generated = self.store.insert(&self.schema, &stored).await?;
        metrics::record_rows_written(self.table(), "inserted", 1);

        let key = match generated {
            Some(id) => Some(Value::Int(id)),
            None => row.get_non_null(self.schema.primary_key()).cloned(),
        };
        let filter = match key {
            Some(id) => self.key_predicate(id)?,
            None => match self.composite_predicate(&row) {
                Ok(filter) => filter,
                Err(_) => {
                    debug!("Inserted row has no key to re-fetch by");
                    return Ok(Model::fetched(row));
                }
            },
        };

        let created = self.fetch_external(self.store.as_executor(), filter).await?;
        info!(key = ?created.get(self.schema.primary_key()), "Created row");
        Ok(Model::fetched(created))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Update
    // ═══════════════════════════════════════════════════════════════════════

    /// Update by primary key when `input` carries one, else by composite key.
    pub async fn update_one(&self, input: &Map<String, JsonValue>, columns: &[&str]) -> Result<Model, ModelError> {
        let pk = self.schema.primary_key();
        let key = self.schema.row_from_json(input, &[pk]);
        match key.get_non_null(pk) {
            Some(id) => self.update_one_by_id(id.clone(), input, columns).await,
            None => self.update_one_by_composite_key(input, columns).await,
        }
    }

    /// Merge `input` over the current row and write the columns that differ.
    ///
    /// The returned model's [`saved_attributes`](Model::saved_attributes) is
    /// the row as it was before the update. When nothing differs no write is
    /// issued and the model is marked unchanged.
    #[tracing::instrument(skip(self, id, input), fields(table = %self.table()))]
    pub async fn update_one_by_id(
        &self,
        id: impl Into<Value>,
        input: &Map<String, JsonValue>,
        columns: &[&str],
    ) -> Result<Model, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "update_one");
        let result: Result<Model, ModelError> = async {
            check_columns(columns)?;
            let filter = self.key_predicate(id.into())?;
            let current = self
                .fetch_external(self.store.as_executor(), self.alive(filter.clone()))
                .await?;
            self.apply_update(current, filter, input, columns).await
        }
        .await;
        self.observe("update_one", result)
    }

    #[tracing::instrument(skip(self, input), fields(table = %self.table()))]
    pub async fn update_one_by_composite_key(
        &self,
        input: &Map<String, JsonValue>,
        columns: &[&str],
    ) -> Result<Model, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "update_one");
        let result: Result<Model, ModelError> = async {
            check_columns(columns)?;
            let key_columns: Vec<&str> = self
                .schema
                .composite_key_columns()
                .iter()
                .map(String::as_str)
                .collect();
            let filter = self.composite_predicate(&self.schema.row_from_json(input, &key_columns))?;
            let current = self
                .fetch_external(self.store.as_executor(), self.alive(filter.clone()))
                .await?;
            self.apply_update(current, filter, input, columns).await
        }
        .await;
        self.observe("update_one", result)
    }

    async fn apply_update(
        &self,
        current: Row,
        filter: Predicate,
        input: &Map<String, JsonValue>,
        columns: &[&str],
    ) -> Result<Model, ModelError> {
        let data = self.schema.row_from_json(input, columns);
        if data.is_empty() {
            return Err(ModelError::EmptyRequest);
        }

        // Current non-null values, overridden by the payload.
        let mut merged: Row = columns
            .iter()
            .filter_map(|c| current.get_non_null(c).map(|v| (c.to_string(), v.clone())))
            .collect();
        merged.merge(&data);
        let merged = self.validate(merged, &ValidationContext::update(true))?;

        let mut changes: Row = merged
            .iter()
            .filter(|(k, v)| !current.get(k).unwrap_or(&Value::Null).same_as(v))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if changes.is_empty() {
            debug!("Update left the row unchanged");
            return Ok(Model::untouched(current));
        }
        self.touch(&mut changes);

        let stored = self.schema.to_storage(&changes)?;
        self.store.update(&self.schema, &filter, &stored).await?;
        metrics::record_rows_written(self.table(), "updated", 1);

        // Keys may have moved; look the row up by its new values.
        let mut expected = current.clone();
        expected.merge(&changes);
        let refetch = match expected.get_non_null(self.schema.primary_key()) {
            Some(id) => self.key_predicate(id.clone())?,
            None => self.composite_predicate(&expected)?,
        };
        let after = self.fetch_external(self.store.as_executor(), refetch).await?;

        debug!(changed = changes.len(), "Updated row");
        Ok(Model::updated(after, current))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Destroy
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove the row with this composite key. Returns 1, or `NotFound`.
    #[tracing::instrument(skip(self, key), fields(table = %self.table()))]
    pub async fn destroy_one_by_composite_key(&self, key: &Row) -> Result<u64, ModelError> {
        let result: Result<u64, ModelError> = async {
            let filter = self.alive(self.composite_predicate(key)?);
            let tx = self.store.begin().await?;
            let outcome: Result<u64, ModelError> = async {
                self.fetch_external(tx.as_executor(), filter.clone()).await?;
                self.remove(tx.as_executor(), filter).await?;
                Ok(1)
            }
            .await;
            self.finish(tx, "destroy_one", outcome).await
        }
        .await;
        self.observe("destroy_one", result)
    }

    /// Remove every row matching the filter object. Zero matches is not an
    /// error; an empty filter is.
    #[tracing::instrument(skip(self, options), fields(table = %self.table()))]
    pub async fn destroy_many(&self, options: &Map<String, JsonValue>, columns: &[&str]) -> Result<u64, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "destroy_many");
        let result: Result<u64, ModelError> = async {
            check_columns(columns)?;
            let filter = compile(&self.schema, options, columns)?.ok_or(ModelError::EmptyRequest)?;
            let filter = self.alive(filter);

            let tx = self.store.begin().await?;
            let outcome: Result<u64, ModelError> = async {
                let matched = tx.count(&self.schema, Some(&filter)).await?;
                if matched == 0 {
                    debug!("Nothing to destroy");
                    return Ok(0);
                }
                self.remove(tx.as_executor(), filter).await
            }
            .await;
            self.finish(tx, "destroy_many", outcome).await
        }
        .await;
        self.observe("destroy_many", result)
    }
}
