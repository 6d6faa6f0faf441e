// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors surfaced by repository operations.
//!
//! Callers usually switch on [`ModelError::code`], which yields one of the
//! fixed tags or, for database failures, the driver's own error code.

use thiserror::Error;

use crate::identifier::IdError;
use crate::storage::traits::StorageError;

pub const EMPTY_REQUEST: &str = "EMPTY_REQUEST";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const SERVER_ERROR: &str = "SERVER_ERROR";

pub(crate) const COLUMNS_ERROR: &str = "Columns should be an array like ['id', 'name', 'status']";

#[derive(Error, Debug)]
pub enum ModelError {
    /// Nothing left to write after restricting the input to allowed columns.
    #[error("EMPTY_REQUEST")]
    EmptyRequest,
    /// A required lookup matched no row.
    #[error("NOT_FOUND")]
    NotFound,
    /// Aggregated validation failures, one message per violation.
    #[error("VALIDATION_ERROR: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// Misuse of the API or an inconsistent table definition.
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Storage(StorageError),
}

impl ModelError {
    /// Stable tag for caller-side matching.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            ModelError::EmptyRequest => EMPTY_REQUEST,
            ModelError::NotFound => NOT_FOUND,
            ModelError::Validation(_) => VALIDATION_ERROR,
            ModelError::Config(_) => CONFIG_ERROR,
            ModelError::Storage(e) => e.code().unwrap_or(SERVER_ERROR),
        }
    }

    pub(crate) fn columns() -> Self {
        ModelError::Config(COLUMNS_ERROR.to_string())
    }
}

impl From<StorageError> for ModelError {
    fn from(e: StorageError) -> Self {
        match e {
            // "Empty result" never leaks past the repository.
            StorageError::EmptyResult => ModelError::NotFound,
            other => ModelError::Storage(other),
        }
    }
}

impl From<IdError> for ModelError {
    fn from(e: IdError) -> Self {
        ModelError::Validation(vec![e.to_string()])
    }
}
