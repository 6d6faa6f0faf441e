// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends.
//!
//! - [`sql::SqlStore`]: MySQL or SQLite through the sqlx `Any` driver
//! - [`memory::MemoryStore`]: in-process tables, predicates evaluated directly

pub mod memory;
pub mod sql;
pub mod traits;
