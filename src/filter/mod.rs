// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter expressions.
//!
//! Structured options objects are compiled into a [`Predicate`] tree, which
//! storage backends either render to SQL ([`SqlTranslator`]) or evaluate
//! directly ([`Predicate::matches`]).
//!
//! # Options format
//!
//! ```json
//! {
//!   "first_name": "Ann",                                   // plain equality
//!   "balance": {"operator": "between", "value": "50,150"}, // operator entry
//!   "email": ["like", "%@x.com", "or"],                    // array form + logic
//!   "_or": {"last_name": "Lee"},                           // nested group
//!   "withQuery": "firstName",                              // named extension
//!   "_logic": "or"                                         // joins plain entries
//! }
//! ```
//!
//! # Modules
//!
//! - [`operator`]: the operator table
//! - [`sanitize`]: value normalization (keywords, comma lists, identifiers)
//! - [`predicate`]: the compiled tree and its in-memory evaluation
//! - [`compiler`]: options → predicate
//! - [`sql_translator`]: predicate and statements → parameterized SQL

pub mod compiler;
pub mod operator;
pub mod predicate;
pub mod sanitize;
pub mod sql_translator;

pub use compiler::compile;
pub use operator::Operator;
pub use predicate::{CompareOp, Join, MatchMode, Predicate};
pub use sanitize::{sanitize, FilterValue};
pub use sql_translator::{group_by_columns, Dialect, SqlQuery, SqlTranslator};
