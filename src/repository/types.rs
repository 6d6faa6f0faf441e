// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::value::{Row, Value};

/// Decides whether an existing row (left) is the same record as a desired
/// row (right) during a sync.
pub type Matcher = Arc<dyn Fn(&Row, &Row) -> bool + Send + Sync>;

/// A fetched row plus the state it had before the call that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    attributes: Row,
    saved: Option<Row>,
    unchanged: bool,
}

impl Model {
    pub(crate) fn fetched(attributes: Row) -> Self {
        Self {
            attributes,
            saved: None,
            unchanged: false,
        }
    }

    pub(crate) fn updated(attributes: Row, before: Row) -> Self {
        Self {
            attributes,
            saved: Some(before),
            unchanged: false,
        }
    }

    pub(crate) fn untouched(attributes: Row) -> Self {
        Self {
            saved: Some(attributes.clone()),
            attributes,
            unchanged: true,
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    /// Current values, identifiers decoded.
    #[must_use]
    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    /// Values before the update that produced this model. Falls back to the
    /// current values for models that were never updated.
    #[must_use]
    pub fn saved_attributes(&self) -> &Row {
        self.saved.as_ref().unwrap_or(&self.attributes)
    }

    /// The update found nothing to change and issued no write.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.unchanged
    }

    /// Columns whose value differs from the snapshot.
    #[must_use]
    pub fn changed_columns(&self) -> Vec<&str> {
        let Some(saved) = &self.saved else {
            return Vec::new();
        };
        self.attributes
            .iter()
            .filter(|(k, v)| !saved.get(k).is_some_and(|s| s.same_as(v)))
            .map(|(k, _)| k)
            .collect()
    }

    #[must_use]
    pub fn into_attributes(self) -> Row {
        self.attributes
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        self.attributes.to_json()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    pub row_count: u64,
    pub page_count: u64,
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub pagination: Pagination,
}

impl Page {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        json!({
            "rows": self.rows.iter().map(Row::to_json).collect::<Vec<_>>(),
            "pagination": {
                "page": self.pagination.page,
                "pageSize": self.pagination.page_size,
                "rowCount": self.pagination.row_count,
                "pageCount": self.pagination.page_count,
            }
        })
    }
}

/// Outcome of [`Repository::bulk_sync`](super::Repository::bulk_sync).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Rows written as new records, identifiers filled in.
    pub inserted: Vec<Row>,
    /// New values, with the pre-update row as the saved snapshot.
    pub updated: Vec<Model>,
    pub destroyed: Vec<Row>,
    pub unchanged: Vec<Row>,
}

impl SyncResult {
    /// Number of rows written.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.destroyed.len()
    }
}

/// Knobs for [`Repository::bulk_sync`](super::Repository::bulk_sync).
#[derive(Clone, Default)]
pub struct SyncOptions {
    pub no_insert: bool,
    pub no_update: bool,
    pub no_destroy: bool,
    /// Overrides primary key identity.
    pub is_match: Option<Matcher>,
}

impl SyncOptions {
    #[must_use]
    pub fn matching<F>(mut self, f: F) -> Self
    where
        F: Fn(&Row, &Row) -> bool + Send + Sync + 'static,
    {
        self.is_match = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("no_insert", &self.no_insert)
            .field("no_update", &self.no_update)
            .field("no_destroy", &self.no_destroy)
            .field("is_match", &self.is_match.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertOptions {
    /// Re-select the inserted rows from storage.
    pub return_rows: bool,
    /// Issue one insert per row concurrently instead of one multi-row insert.
    pub concurrent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkUpdateOptions {
    /// Key or bookkeeping columns to rewrite on conflict anyway.
    pub include: Vec<String>,
}
