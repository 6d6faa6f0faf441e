// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use futures::future::try_join_all;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use super::{check_columns, Repository};
use crate::error::ModelError;
use crate::events::ImportEvent;
use crate::filter::Predicate;
use crate::metrics::{self, LatencyTimer};
use crate::storage::traits::{RowExecutor, SelectQuery};
use crate::validation::ValidationContext;
use crate::value::{Row, Value};

impl Repository {
    /// Create-or-update each row inside one transaction.
    ///
    /// Rows carrying a primary key that already exists (soft-deleted or
    /// not) update that row; everything else is inserted. `restore` sees the
    /// existing row and the incoming changes and may edit both; returning
    /// `true` makes every update column come from the (edited) existing row
    /// before the changes are applied.
    ///
    /// Events are published once the transaction commits, one per row.
    #[tracing::instrument(skip(self, rows, restore), fields(table = %self.table(), rows = rows.len()))]
    pub async fn import_many<F>(
        &self,
        rows: &[Map<String, JsonValue>],
        columns: &[&str],
        restore: F,
    ) -> Result<u64, ModelError>
    where
        F: Fn(&mut Row, &mut Row) -> bool + Send + Sync,
    {
        let _timer = LatencyTimer::new(self.table(), "import_many");
        let result: Result<u64, ModelError> = async {
            check_columns(columns)?;
            if rows.is_empty() {
                return Ok(0);
            }

            let pk = self.schema.primary_key();
            let update_columns: Vec<&str> = columns
                .iter()
                .copied()
                .filter(|c| *c != pk && self.schema.has_column(c))
                .collect();

            let tx = self.store.begin().await?;
            let outcome = try_join_all(rows.iter().map(|row| {
                self.import_row(
                    tx.as_executor(),
                    self.schema.row_from_json(row, columns),
                    &update_columns,
                    &restore,
                )
            }))
            .await;
            let events = self.finish(tx, "import_many", outcome).await?;

            let count = events.len() as u64;
            metrics::record_rows_written(self.table(), "imported", events.len());
            for event in events {
                metrics::record_event(self.table(), event.name());
                self.events.publish(event);
            }
            info!(count, "Imported rows");
            Ok(count)
        }
        .await;
        self.observe("import_many", result)
    }

    async fn import_row<F>(
        &self,
        exec: &dyn RowExecutor,
        data: Row,
        update_columns: &[&str],
        restore: &F,
    ) -> Result<ImportEvent, ModelError>
    where
        F: Fn(&mut Row, &mut Row) -> bool + Send + Sync,
    {
        if let Some(id) = data.get_non_null(self.schema.primary_key()).cloned() {
            let filter = self.key_predicate(id)?;
            // Soft-deleted rows are deliberately visible here.
            let found = exec
                .fetch(&self.schema, &SelectQuery::filtered(Some(filter.clone())))
                .await?
                .into_iter()
                .next();
            if let Some(found) = found {
                let existing = self.schema.to_external(found)?;
                return self
                    .import_update(exec, existing, filter, &data, update_columns, restore)
                    .await;
            }
        }

        let row = self.prepare_insert(data);
        let mut row = self.validate(row, &ValidationContext::insert())?;
        let generated = exec.insert(&self.schema, &self.schema.to_storage(&row)?).await?;
        if let Some(id) = generated {
            row.set(self.schema.primary_key(), id);
        }
        Ok(ImportEvent::Created(row))
    }

    async fn import_update<F>(
        &self,
        exec: &dyn RowExecutor,
        mut existing: Row,
        filter: Predicate,
        data: &Row,
        update_columns: &[&str],
        restore: &F,
    ) -> Result<ImportEvent, ModelError>
    where
        F: Fn(&mut Row, &mut Row) -> bool + Send + Sync,
    {
        let mut changes = data.pick(update_columns);
        let mut base: Row = update_columns
            .iter()
            .filter(|c| !changes.contains(c))
            .filter_map(|c| existing.get_non_null(c).map(|v| (c.to_string(), v.clone())))
            .collect();

        if restore(&mut existing, &mut changes) {
            debug!("Restoring row");
            for column in update_columns {
                base.set(*column, existing.get(column).cloned().unwrap_or(Value::Null));
            }
        }
        base.merge(&changes);

        let mut base = self.validate(base, &ValidationContext::update(true))?;
        self.touch(&mut base);
        if !base.is_empty() {
            let stored = self.schema.to_storage(&base)?;
            exec.update(&self.schema, &filter, &stored).await?;
        }

        existing.merge(&base);
        Ok(ImportEvent::Updated(existing))
    }
}
