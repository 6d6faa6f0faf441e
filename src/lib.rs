// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # modelbase
//!
//! Generic list/create/update/delete/import/bulk operations over relational
//! tables, plus a compiler from structured filter objects to SQL predicates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Repository                           │
//! │  • list / find / create / update / destroy                 │
//! │  • bulk insert / update / upsert / destroy / sync          │
//! │  • import with lifecycle events (EventBus)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 (filter objects → Predicate trees)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Filter Compiler                        │
//! │  • operators, nested _or / _and groups, withQuery          │
//! │  • value sanitizing and identifier encoding                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         RowStore                            │
//! │  • SqlStore: sqlx Any (MySQL, SQLite)                      │
//! │  • MemoryStore: in-process, evaluates predicates directly  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modelbase::schema::{ColumnType, TableSchema};
//! use modelbase::storage::sql::SqlStore;
//! use modelbase::{ModelbaseConfig, Repository};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), modelbase::ModelError> {
//!     let config = ModelbaseConfig::for_url("sqlite://app.db?mode=rwc");
//!     let store = Arc::new(SqlStore::connect(&config).await?);
//!
//!     let users = Repository::with_config(
//!         TableSchema::new("users")
//!             .column("id", ColumnType::Integer)
//!             .column("email", ColumnType::Text)
//!             .column("balance", ColumnType::Integer),
//!         store,
//!         &config,
//!     );
//!
//!     let filter = json!({"balance": {"operator": "BETWEEN", "value": [50, 150]}});
//!     let page = users.list(filter.as_object().unwrap(), &["email", "balance"]).await?;
//!     println!("{}", page.to_json());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`repository`]: the [`Repository`] operations
//! - [`filter`]: operators, sanitizer, compiler and SQL rendering
//! - [`schema`]: table definitions and row conversion
//! - [`storage`]: the storage seam and its SQL and in-memory backends
//! - [`events`]: import lifecycle events
//! - [`resilience`]: retry with backoff for transient failures

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod identifier;
pub mod metrics;
pub mod repository;
pub mod resilience;
pub mod schema;
pub mod storage;
pub mod validation;
pub mod value;

pub use config::ModelbaseConfig;
pub use error::ModelError;
pub use events::{EventBus, ImportEvent};
pub use filter::{Operator, Predicate};
pub use identifier::{IdCodec, IdError, OrderedUuid};
pub use metrics::LatencyTimer;
pub use repository::{
    BulkInsertOptions, BulkUpdateOptions, Model, Page, Pagination, Repository, SyncOptions, SyncResult,
};
pub use resilience::retry::RetryConfig;
pub use schema::{ColumnType, KeyStrategy, TableSchema};
pub use storage::memory::MemoryStore;
pub use storage::sql::SqlStore;
pub use storage::traits::{RowExecutor, RowStore, StorageError, StoreTransaction};
pub use validation::{ValidationContext, Validator, WriteMethod};
pub use value::{Row, Value};
