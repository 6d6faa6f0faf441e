// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table definitions.
//!
//! A [`TableSchema`] is built once per table and handed to a
//! [`Repository`](crate::Repository). It carries everything the generic
//! operations need to know about the table: columns and their types, the
//! primary key strategy, an optional composite key, timestamp, soft-delete
//! and version columns, binary identifier columns, the validator and the
//! registry of named filter extensions.
//!
//! # Example
//!
//! ```rust
//! use modelbase::schema::{ColumnType, TableSchema};
//! use modelbase::filter::Predicate;
//!
//! let users = TableSchema::new("users")
//!     .column("id", ColumnType::Integer)
//!     .column("first_name", ColumnType::Text)
//!     .column("email", ColumnType::Text)
//!     .column("balance", ColumnType::Integer)
//!     .column("created_at", ColumnType::Timestamp)
//!     .column("updated_at", ColumnType::Timestamp)
//!     .column("deleted_at", ColumnType::Timestamp)
//!     .auto_increment("id")
//!     .composite_key(&["email"])
//!     .timestamps()
//!     .soft_delete("deleted_at")
//!     .with_query("firstName", |schema, options| {
//!         let name = options.get("fancy")?.as_str()?;
//!         Some(Predicate::eq(schema.qualify("first_name"), name))
//!     })
//!     .unwrap();
//!
//! assert_eq!(users.qualify("email"), "users.email");
//! assert_eq!(users.qualify("other.email"), "other.email");
//! assert!(users.query_extension("firstName").is_some());
//! ```
//!
//! # Design
//!
//! - **Explicit configuration**: no runtime mixins; one value per table
//! - **Registry validated up front**: extension names are checked when they
//!   are registered, lookups at call time only fail for names never registered

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::error::ModelError;
use crate::filter::Predicate;
use crate::identifier::{IdCodec, OrderedUuid};
use crate::validation::{ValidationContext, Validator};
use crate::value::{Row, Value};

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Named filter extension, invoked with the whole options object.
pub type QueryExtension =
    Arc<dyn Fn(&TableSchema, &Map<String, JsonValue>) -> Option<Predicate> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    /// Raw bytes; identifier columns use this with a codec attached.
    Binary,
    /// Epoch milliseconds.
    Timestamp,
}

impl ColumnType {
    /// Lossless coercions only; anything else is left for the validator
    /// or the database to reject.
    #[must_use]
    pub fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (ColumnType::Integer | ColumnType::Timestamp, Value::Float(f)) if f.fract() == 0.0 => {
                Value::Int(f as i64)
            }
            (ColumnType::Integer, Value::Bool(b)) => Value::Int(i64::from(b)),
            (ColumnType::Float, Value::Int(i)) => Value::Float(i as f64),
            (ColumnType::Boolean, Value::Int(i @ (0 | 1))) => Value::Bool(i == 1),
            (ColumnType::Binary, Value::Text(s)) => Value::Bytes(s.into_bytes()),
            (_, v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// How primary key values come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Assigned by the database on insert.
    AutoIncrement,
    /// Supplied by the caller.
    Natural,
    /// Generated prefixed UUIDv7, stored as binary.
    OrderedUuid,
}

pub struct TableSchema {
    table: String,
    columns: Vec<Column>,
    primary_key: String,
    key_strategy: KeyStrategy,
    composite_key: Vec<String>,
    timestamps: bool,
    soft_delete: Option<String>,
    version_column: Option<String>,
    codecs: BTreeMap<String, Arc<dyn IdCodec>>,
    validator: Option<Arc<dyn Validator>>,
    extensions: BTreeMap<String, QueryExtension>,
}

impl fmt::Debug for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSchema")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .field("key_strategy", &self.key_strategy)
            .field("composite_key", &self.composite_key)
            .field("timestamps", &self.timestamps)
            .field("soft_delete", &self.soft_delete)
            .field("version_column", &self.version_column)
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .field("validator", &self.validator.is_some())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TableSchema {
    /// New table with an auto-increment `id` key and no columns yet.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            primary_key: "id".to_string(),
            key_strategy: KeyStrategy::AutoIncrement,
            composite_key: Vec::new(),
            timestamps: false,
            soft_delete: None,
            version_column: None,
            codecs: BTreeMap::new(),
            validator: None,
            extensions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        let name = name.into();
        self.columns.retain(|c| c.name != name);
        self.columns.push(Column { name, ty });
        self
    }

    #[must_use]
    pub fn auto_increment(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self.key_strategy = KeyStrategy::AutoIncrement;
        self
    }

    #[must_use]
    pub fn natural_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self.key_strategy = KeyStrategy::Natural;
        self
    }

    /// Primary key holding generated `prefix` + UUIDv7 identifiers.
    #[must_use]
    pub fn ordered_uuid(mut self, column: impl Into<String>, prefix: &str) -> Self {
        let column = column.into();
        self.codecs
            .insert(column.clone(), Arc::new(OrderedUuid::new(prefix)));
        self.primary_key = column;
        self.key_strategy = KeyStrategy::OrderedUuid;
        self
    }

    /// Non-key column holding binary identifiers.
    #[must_use]
    pub fn id_column(mut self, column: impl Into<String>, codec: Arc<dyn IdCodec>) -> Self {
        self.codecs.insert(column.into(), codec);
        self
    }

    #[must_use]
    pub fn composite_key(mut self, columns: &[&str]) -> Self {
        self.composite_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Maintain `created_at` / `updated_at`.
    #[must_use]
    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    #[must_use]
    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = Some(column.into());
        self
    }

    #[must_use]
    pub fn version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Register a named filter extension reachable through `withQuery`.
    pub fn with_query<F>(mut self, name: &str, extension: F) -> Result<Self, ModelError>
    where
        F: Fn(&TableSchema, &Map<String, JsonValue>) -> Option<Predicate> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(ModelError::Config("query extension name cannot be empty".into()));
        }
        if self.extensions.contains_key(name) {
            return Err(ModelError::Config(format!(
                "query extension '{}' is already registered on '{}'",
                name, self.table
            )));
        }
        self.extensions.insert(name.to_string(), Arc::new(extension));
        Ok(self)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        let name = unqualified(name);
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_type(name).is_some()
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    #[must_use]
    pub fn key_strategy(&self) -> KeyStrategy {
        self.key_strategy
    }

    #[must_use]
    pub fn composite_key_columns(&self) -> &[String] {
        &self.composite_key
    }

    #[must_use]
    pub fn has_timestamps(&self) -> bool {
        self.timestamps
    }

    #[must_use]
    pub fn updated_at_column(&self) -> Option<&str> {
        (self.timestamps && self.has_column(UPDATED_AT)).then_some(UPDATED_AT)
    }

    #[must_use]
    pub fn created_at_column(&self) -> Option<&str> {
        (self.timestamps && self.has_column(CREATED_AT)).then_some(CREATED_AT)
    }

    #[must_use]
    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    #[must_use]
    pub fn version_column_name(&self) -> Option<&str> {
        self.version_column.as_deref()
    }

    #[must_use]
    pub fn codec(&self, column: &str) -> Option<&dyn IdCodec> {
        self.codecs.get(unqualified(column)).map(|c| c.as_ref())
    }

    #[must_use]
    pub fn query_extension(&self, name: &str) -> Option<&QueryExtension> {
        self.extensions.get(name)
    }

    /// Prefix a bare column with the table name; dotted names pass through.
    #[must_use]
    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table, column)
        }
    }

    /// Key and bookkeeping columns that never count as a data change.
    #[must_use]
    pub fn is_meta_column(&self, column: &str) -> bool {
        column == self.primary_key
            || (self.timestamps && (column == CREATED_AT || column == UPDATED_AT))
            || self.version_column.as_deref() == Some(column)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Row conversion
    // ═══════════════════════════════════════════════════════════════════════

    /// Build an external-form row from caller JSON, keeping only `allowed`
    /// columns that exist on the table. Identifiers stay text; empty
    /// identifiers become NULL.
    #[must_use]
    pub fn row_from_json(&self, input: &Map<String, JsonValue>, allowed: &[&str]) -> Row {
        input
            .iter()
            .filter(|(k, _)| allowed.contains(&k.as_str()))
            .filter_map(|(k, v)| {
                let ty = self.column_type(k)?;
                let value = Value::from_json(v);
                let value = if self.codec(k).is_some() {
                    match value {
                        Value::Text(s) if s.is_empty() => Value::Null,
                        other => other,
                    }
                } else {
                    ty.coerce(value)
                };
                Some((k.clone(), value))
            })
            .collect()
    }

    /// Encode one external value for storage.
    pub fn storage_value(&self, column: &str, value: Value) -> Result<Value, ModelError> {
        match (self.codec(column), value) {
            (Some(_), Value::Text(s)) if s.is_empty() => Ok(Value::Null),
            (Some(codec), Value::Text(s)) => Ok(Value::Bytes(codec.encode(&s)?)),
            (_, v) => Ok(v),
        }
    }

    /// External form → stored form (identifier columns encoded).
    pub fn to_storage(&self, row: &Row) -> Result<Row, ModelError> {
        row.iter()
            .map(|(k, v)| Ok((k.to_string(), self.storage_value(k, v.clone())?)))
            .collect()
    }

    /// Stored form → external form (identifier columns decoded). Identifiers
    /// never leave the repository as raw bytes.
    pub fn to_external(&self, row: Row) -> Result<Row, ModelError> {
        row.into_iter()
            .map(|(k, v)| match (self.codec(&k), v) {
                (Some(codec), Value::Bytes(bytes)) => {
                    let id = codec.decode(&bytes).map_err(|e| {
                        ModelError::Storage(crate::storage::traits::StorageError::Backend(
                            format!("column '{}': {}", k, e),
                        ))
                    })?;
                    Ok((k, Value::Text(id)))
                }
                (_, v) => Ok((k, v)),
            })
            .collect()
    }

    /// Run the attached validator, if any.
    pub fn validate(&self, row: Row, ctx: &ValidationContext) -> Result<Row, Vec<String>> {
        match &self.validator {
            Some(v) => v.validate(&row, ctx),
            None => Ok(row),
        }
    }
}

/// Strip a `table.` qualifier.
#[must_use]
pub fn unqualified(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn budgets() -> TableSchema {
        TableSchema::new("budgets")
            .column("id", ColumnType::Binary)
            .column("external_id", ColumnType::Binary)
            .column("type", ColumnType::Text)
            .column("budget", ColumnType::Float)
            .ordered_uuid("id", "BU")
            .id_column("external_id", Arc::new(OrderedUuid::new("EX")))
    }

    #[test]
    fn test_row_from_json_restricts_and_coerces() {
        let schema = budgets();
        let input = json!({"type": "daily", "budget": 100, "secret": 1, "external_id": ""});
        let row = schema.row_from_json(input.as_object().unwrap(), &["type", "budget", "external_id"]);

        assert_eq!(row.get("type"), Some(&Value::Text("daily".into())));
        assert_eq!(row.get("budget"), Some(&Value::Float(100.0)));
        assert_eq!(row.get("external_id"), Some(&Value::Null));
        assert!(!row.contains("secret"));
    }

    #[test]
    fn test_storage_round_trip() {
        let schema = budgets();
        let id = schema.codec("id").unwrap().generate();
        let row = Row::new().with("id", id.clone()).with("type", "daily");

        let stored = schema.to_storage(&row).unwrap();
        assert!(matches!(stored.get("id"), Some(Value::Bytes(b)) if b.len() == 18));

        let external = schema.to_external(stored).unwrap();
        assert_eq!(external.get("id"), Some(&Value::Text(id)));
    }

    #[test]
    fn test_invalid_identifier_is_validation_error() {
        let schema = budgets();
        let err = schema.storage_value("id", Value::Text("nope".into())).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_meta_columns() {
        let schema = TableSchema::new("t")
            .column("id", ColumnType::Integer)
            .column("created_at", ColumnType::Timestamp)
            .column("updated_at", ColumnType::Timestamp)
            .column("version", ColumnType::Integer)
            .column("name", ColumnType::Text)
            .timestamps()
            .version_column("version");

        assert!(schema.is_meta_column("id"));
        assert!(schema.is_meta_column("created_at"));
        assert!(schema.is_meta_column("version"));
        assert!(!schema.is_meta_column("name"));
        assert_eq!(schema.updated_at_column(), Some("updated_at"));
    }

    #[test]
    fn test_duplicate_extension_rejected() {
        let schema = TableSchema::new("t")
            .with_query("q", |_, _| None)
            .unwrap();
        let err = schema.with_query("q", |_, _| None).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = TableSchema::new("t").with_query(" ", |_, _| None).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }

    #[test]
    fn test_redefining_column_replaces_it() {
        let schema = TableSchema::new("t")
            .column("a", ColumnType::Text)
            .column("a", ColumnType::Integer);
        assert_eq!(schema.columns().len(), 1);
        assert_eq!(schema.column_type("t.a"), Some(ColumnType::Integer));
    }
}
