// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter value normalization.
//!
//! Query-string style filters arrive as loosely typed JSON: `"null"` for
//! NULL, `"a,b,c"` for an `IN` list, identifiers in their text form. The
//! sanitizer turns them into typed values before the compiler sees them.

use serde_json::Value as JsonValue;

use super::operator::Operator;
use crate::error::ModelError;
use crate::identifier::IdCodec;
use crate::value::Value;

/// A scalar or a (possibly nested) list of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Value),
    List(Vec<FilterValue>),
}

impl FilterValue {
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Array(items) => FilterValue::List(items.iter().map(Self::from_json).collect()),
            other => FilterValue::Scalar(Value::from_json(other)),
        }
    }

    /// Flatten into scalars, depth first.
    #[must_use]
    pub fn into_scalars(self) -> Vec<Value> {
        match self {
            FilterValue::Scalar(v) => vec![v],
            FilterValue::List(items) => items.into_iter().flat_map(Self::into_scalars).collect(),
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FilterValue::Scalar(v) => Some(v),
            FilterValue::List(_) => None,
        }
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Scalar(v)
    }
}

/// Normalize a filter value for `op`. `codec` is set when the column holds
/// binary identifiers.
pub fn sanitize(
    value: FilterValue,
    op: Option<Operator>,
    codec: Option<&dyn IdCodec>,
) -> Result<FilterValue, ModelError> {
    match value {
        FilterValue::List(items) => items
            .into_iter()
            .map(|item| sanitize_element(item, codec))
            .collect::<Result<Vec<_>, _>>()
            .map(FilterValue::List),
        FilterValue::Scalar(Value::Text(s)) if op.is_some_and(Operator::takes_list) => {
            split_list(&s)
                .into_iter()
                .map(|token| sanitize_scalar(Value::Text(token), codec).map(FilterValue::Scalar))
                .collect::<Result<Vec<_>, _>>()
                .map(FilterValue::List)
        }
        FilterValue::Scalar(v) => sanitize_scalar(v, codec).map(FilterValue::Scalar),
    }
}

/// List elements are never split again.
fn sanitize_element(value: FilterValue, codec: Option<&dyn IdCodec>) -> Result<FilterValue, ModelError> {
    sanitize(value, None, codec)
}

fn sanitize_scalar(value: Value, codec: Option<&dyn IdCodec>) -> Result<Value, ModelError> {
    let value = match value {
        Value::Text(s) if s.eq_ignore_ascii_case("null") => Value::Null,
        Value::Text(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
        Value::Text(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
        other => other,
    };
    match (codec, value) {
        (Some(_), Value::Text(s)) if s.is_empty() => Ok(Value::Null),
        (Some(codec), Value::Text(s)) => Ok(Value::Bytes(codec.encode(&s)?)),
        (_, v) => Ok(v),
    }
}

/// Split on commas not preceded by a backslash; `\,` becomes `,`. Tokens
/// are trimmed and empty tokens dropped.
fn split_list(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => tokens.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    tokens.push(current);

    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
