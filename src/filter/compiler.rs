// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Options object → [`Predicate`].
//!
//! ```
//! use modelbase::filter::compile;
//! use modelbase::schema::{ColumnType, TableSchema};
//! use modelbase::Row;
//! use serde_json::json;
//!
//! let schema = TableSchema::new("users")
//!     .column("id", ColumnType::Integer)
//!     .column("first_name", ColumnType::Text)
//!     .column("balance", ColumnType::Integer);
//!
//! let options = json!({
//!     "first_name": "Ann",
//!     "_or": {"balance": {"operator": "between", "value": "50,150"}},
//! });
//! let predicate = compile(&schema, options.as_object().unwrap(), &["first_name", "balance"])
//!     .unwrap()
//!     .unwrap();
//!
//! assert!(predicate.matches(&Row::new().with("first_name", "Bob").with("balance", 100)));
//! assert!(!predicate.matches(&Row::new().with("first_name", "Bob").with("balance", 10)));
//! ```

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use super::operator::Operator;
use super::predicate::{CompareOp, Join, MatchMode, Predicate};
use super::sanitize::{sanitize, FilterValue};
use crate::error::ModelError;
use crate::schema::TableSchema;
use crate::value::Value;

pub const OR_GROUP: &str = "_or";
pub const AND_GROUP: &str = "_and";
pub const WITH_QUERY: &str = "withQuery";
pub const LOGIC: &str = "_logic";

/// Compile `options` into a predicate over `schema`, honoring only
/// `allowed` columns plus the reserved group and extension keys.
///
/// Returns `Ok(None)` when nothing applies.
pub fn compile(
    schema: &TableSchema,
    options: &Map<String, JsonValue>,
    allowed: &[&str],
) -> Result<Option<Predicate>, ModelError> {
    let plain_join = match options.get(LOGIC).and_then(JsonValue::as_str) {
        Some(logic) if logic.eq_ignore_ascii_case("none") => None,
        Some(logic) if logic.eq_ignore_ascii_case("or") => Some(Join::Or),
        _ => Some(Join::And),
    };

    let entries = options
        .iter()
        .filter(|(key, _)| is_reserved(key) || allowed.contains(&key.as_str()));

    let mut plain = Vec::new();
    let mut complex = Vec::new();
    for (key, value) in entries {
        if !is_reserved(key) && !value.is_object() && !value.is_array() {
            plain.push((key, value));
        } else {
            complex.push((key, value));
        }
    }

    let mut chain: Vec<(Join, Predicate)> = Vec::new();

    if let Some(join) = plain_join {
        let mut clause = Vec::new();
        for (key, value) in plain {
            let value = sanitize(FilterValue::from_json(value), Some(Operator::Eq), schema.codec(key))?;
            if let FilterValue::Scalar(value) = value {
                clause.push((join, Predicate::eq(schema.qualify(key), value)));
            }
        }
        match clause.len() {
            0 => {}
            1 => chain.extend(clause),
            _ => chain.push((Join::And, Predicate::Group(Box::new(Predicate::Chain(clause))))),
        }
    }

    for (key, value) in complex {
        match key.as_str() {
            OR_GROUP | AND_GROUP => {
                let join = if key == OR_GROUP { Join::Or } else { Join::And };
                let Some(nested) = value.as_object() else {
                    debug!(key = %key, "Skipping non-object filter group");
                    continue;
                };
                if let Some(group) = compile(schema, nested, allowed)? {
                    chain.push((join, Predicate::Group(Box::new(group))));
                }
            }
            WITH_QUERY => {
                for name in extension_names(value) {
                    let extension = schema.query_extension(name).ok_or_else(|| {
                        ModelError::Config(format!(
                            "query extension '{}' is not registered on '{}'",
                            name,
                            schema.table()
                        ))
                    })?;
                    if let Some(predicate) = extension(schema, options) {
                        chain.push((Join::And, Predicate::Group(Box::new(predicate))));
                    }
                }
            }
            column => {
                if let Some((join, predicate)) = compile_entry(schema, column, value)? {
                    chain.push((join, predicate));
                }
            }
        }
    }

    Ok(match chain.len() {
        0 => None,
        1 => chain.pop().map(|(_, p)| p),
        _ => Some(Predicate::Chain(chain)),
    })
}

fn is_reserved(key: &str) -> bool {
    matches!(key, OR_GROUP | AND_GROUP | WITH_QUERY)
}

fn extension_names(value: &JsonValue) -> Vec<&str> {
    match value {
        JsonValue::String(name) => vec![name.as_str()],
        JsonValue::Array(names) => names.iter().filter_map(JsonValue::as_str).collect(),
        _ => Vec::new(),
    }
}

/// `{operator, value, logic?}` or `[operator, value, logic?]`. Anything
/// malformed is skipped.
fn compile_entry(
    schema: &TableSchema,
    column: &str,
    entry: &JsonValue,
) -> Result<Option<(Join, Predicate)>, ModelError> {
    let (operator, value, logic) = match entry {
        JsonValue::Object(map) => (
            map.get("operator").and_then(JsonValue::as_str),
            map.get("value"),
            map.get("logic").and_then(JsonValue::as_str),
        ),
        JsonValue::Array(items) => (
            items.first().and_then(JsonValue::as_str),
            items.get(1),
            items.get(2).and_then(JsonValue::as_str),
        ),
        _ => return Ok(None),
    };

    let (Some(op), Some(value)) = (operator.and_then(Operator::parse), value) else {
        debug!(column, ?operator, "Skipping filter entry with unknown operator or no value");
        return Ok(None);
    };

    let join = match logic {
        Some(l) if l.eq_ignore_ascii_case("or") => Join::Or,
        _ => Join::And,
    };

    let value = sanitize(FilterValue::from_json(value), Some(op), schema.codec(column))?;
    let column = schema.qualify(column);

    Ok(build(column, op, value).map(|p| (join, p)))
}

fn build(column: String, op: Operator, value: FilterValue) -> Option<Predicate> {
    let scalar = |value: FilterValue| match value {
        FilterValue::Scalar(v) => Some(v),
        FilterValue::List(_) => None,
    };
    let text = |value: FilterValue| scalar(value).and_then(|v| v.as_text());

    match op {
        Operator::Eq => Some(Predicate::compare(column, CompareOp::Eq, scalar(value)?)),
        Operator::Ne => Some(Predicate::compare(column, CompareOp::Ne, scalar(value)?)),
        Operator::Gt => Some(Predicate::compare(column, CompareOp::Gt, scalar(value)?)),
        Operator::Gte => Some(Predicate::compare(column, CompareOp::Gte, scalar(value)?)),
        Operator::Lt => Some(Predicate::compare(column, CompareOp::Lt, scalar(value)?)),
        Operator::Lte => Some(Predicate::compare(column, CompareOp::Lte, scalar(value)?)),
        Operator::Like | Operator::NotLike => Some(Predicate::Like {
            column,
            pattern: text(value)?,
            negated: op == Operator::NotLike,
        }),
        Operator::Between | Operator::NotBetween => {
            let bounds = value.into_scalars();
            let [low, high]: [Value; 2] = bounds.try_into().ok()?;
            Some(Predicate::Between {
                column,
                low,
                high,
                negated: op == Operator::NotBetween,
            })
        }
        Operator::In | Operator::NotIn => Some(Predicate::In {
            column,
            values: value.into_scalars(),
            negated: op == Operator::NotIn,
        }),
        Operator::Match | Operator::MatchBool | Operator::MatchQuery => Some(Predicate::Match {
            column,
            query: text(value)?,
            mode: match op {
                Operator::MatchBool => MatchMode::Boolean,
                Operator::MatchQuery => MatchMode::QueryExpansion,
                _ => MatchMode::Natural,
            },
        }),
    }
}
