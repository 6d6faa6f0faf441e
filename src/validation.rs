// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schema validation seam.
//!
//! Validation rules live outside this crate; a table attaches a [`Validator`]
//! that checks and coerces rows before they are written. Any
//! `Fn(&Row, &ValidationContext) -> Result<Row, Vec<String>>` closure works.
//!
//! ```
//! use modelbase::{Row, Value, ValidationContext, Validator, WriteMethod};
//!
//! let require_name = |row: &Row, _ctx: &ValidationContext| {
//!     match row.get_non_null("name") {
//!         Some(_) => Ok(row.clone()),
//!         None => Err(vec!["\"name\" is required".to_string()]),
//!     }
//! };
//!
//! let ctx = ValidationContext::insert();
//! assert!(require_name.validate(&Row::new(), &ctx).is_err());
//! assert!(require_name.validate(&Row::new().with("name", "x"), &ctx).is_ok());
//! ```

use crate::value::Row;

/// Which write the row is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Insert,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    pub method: WriteMethod,
    /// The row only carries the columns being changed.
    pub patch: bool,
}

impl ValidationContext {
    #[must_use]
    pub fn insert() -> Self {
        Self {
            method: WriteMethod::Insert,
            patch: false,
        }
    }

    #[must_use]
    pub fn update(patch: bool) -> Self {
        Self {
            method: WriteMethod::Update,
            patch,
        }
    }
}

/// Checks a row and returns the coerced row, or every violation found.
pub trait Validator: Send + Sync {
    fn validate(&self, row: &Row, ctx: &ValidationContext) -> Result<Row, Vec<String>>;
}

impl<F> Validator for F
where
    F: Fn(&Row, &ValidationContext) -> Result<Row, Vec<String>> + Send + Sync,
{
    fn validate(&self, row: &Row, ctx: &ValidationContext) -> Result<Row, Vec<String>> {
        self(row, ctx)
    }
}
