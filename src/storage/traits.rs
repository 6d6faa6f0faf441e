// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::filter::Predicate;
use crate::schema::TableSchema;
use crate::value::{Row, Value};

#[derive(Error, Debug)]
pub enum StorageError {
    /// A single-row fetch matched nothing.
    #[error("Empty result")]
    EmptyResult,
    #[error("Connection error: {0}")]
    Connection(String),
    /// Error reported by the database itself; `code` is the driver's code.
    #[error("Database error: {message}")]
    Database {
        code: Option<String>,
        message: String,
    },
    #[error("Duplicate key '{key}' in table '{table}'")]
    DuplicateKey { table: String, key: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Driver-level error code, when one exists.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Database { code, .. } => code.as_deref(),
            StorageError::DuplicateKey { .. } => Some("ER_DUP_ENTRY"),
            _ => None,
        }
    }

    /// Worth retrying outside a transaction.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A `SELECT` against one table.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub filter: Option<Predicate>,
    pub order: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    #[must_use]
    pub fn filtered(filter: Option<Predicate>) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order.push((column.into(), order));
        self
    }
}

/// Multi-row insert whose conflicts rewrite `update_columns`.
#[derive(Debug, Clone)]
pub struct Upsert {
    pub columns: Vec<String>,
    /// One value per column, in `columns` order.
    pub rows: Vec<Vec<Value>>,
    pub conflict_columns: Vec<String>,
    pub update_columns: Vec<String>,
}

/// Statement execution against a store, inside or outside a transaction.
///
/// Rows cross this boundary in stored form (identifiers already binary).
#[async_trait]
pub trait RowExecutor: Send + Sync {
    async fn fetch(&self, schema: &TableSchema, query: &SelectQuery) -> Result<Vec<Row>, StorageError>;

    /// First matching row, or [`StorageError::EmptyResult`].
    async fn fetch_one(&self, schema: &TableSchema, query: &SelectQuery) -> Result<Row, StorageError> {
        let mut query = query.clone();
        query.limit = Some(1);
        self.fetch(schema, &query)
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::EmptyResult)
    }

    async fn count(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError>;

    /// Insert one row; returns the generated key for auto-increment tables.
    async fn insert(&self, schema: &TableSchema, row: &Row) -> Result<Option<i64>, StorageError>;

    /// Insert several rows. Default implementation inserts them one by one.
    async fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StorageError> {
        for row in rows {
            self.insert(schema, row).await?;
        }
        Ok(rows.len() as u64)
    }

    async fn update(
        &self,
        schema: &TableSchema,
        filter: &Predicate,
        changes: &Row,
    ) -> Result<u64, StorageError>;

    /// Delete matching rows; `None` deletes everything.
    async fn delete(&self, schema: &TableSchema, filter: Option<&Predicate>) -> Result<u64, StorageError>;

    async fn upsert(&self, schema: &TableSchema, upsert: &Upsert) -> Result<u64, StorageError>;
}

/// An open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: RowExecutor {
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
    fn as_executor(&self) -> &dyn RowExecutor;
}

#[async_trait]
pub trait RowStore: RowExecutor {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StorageError>;
    fn as_executor(&self) -> &dyn RowExecutor;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(StorageError::EmptyResult.code(), None);
        assert_eq!(
            StorageError::DuplicateKey {
                table: "users".into(),
                key: "a@x.com".into()
            }
            .code(),
            Some("ER_DUP_ENTRY")
        );
        assert_eq!(
            StorageError::Database {
                code: Some("1062".into()),
                message: "dup".into()
            }
            .code(),
            Some("1062")
        );
    }

    #[test]
    fn test_only_connection_errors_are_transient() {
        assert!(StorageError::Connection("reset".into()).is_transient());
        assert!(!StorageError::Backend("x".into()).is_transient());
        assert!(!StorageError::EmptyResult.is_transient());
    }
}
