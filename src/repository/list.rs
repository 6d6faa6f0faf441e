// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use super::{check_columns, Page, Pagination, Repository};
use crate::error::ModelError;
use crate::filter::compile;
use crate::metrics::{self, LatencyTimer};
use crate::storage::traits::{SelectQuery, SortOrder};

pub const ORDER_BY: &str = "order_by";
pub const SELECT: &str = "select";
pub const PAGE: &str = "page";
pub const LIMIT: &str = "limit";
pub const PAGINATE: &str = "paginate";

impl Repository {
    /// Filtered, ordered, paginated rows.
    ///
    /// `options` is a filter object plus the reserved `order_by`, `select`,
    /// `page`, `limit` and `paginate` keys. Only `columns` may be filtered
    /// on or selected.
    #[tracing::instrument(skip(self, options), fields(table = %self.table()))]
    pub async fn list(&self, options: &Map<String, JsonValue>, columns: &[&str]) -> Result<Page, ModelError> {
        let _timer = LatencyTimer::new(self.table(), "list");
        let result = self.list_inner(options, columns).await;
        self.observe("list", result)
    }

    async fn list_inner(&self, options: &Map<String, JsonValue>, columns: &[&str]) -> Result<Page, ModelError> {
        check_columns(columns)?;

        let filter = self.live(compile(&self.schema, options, columns)?);
        let mut query = SelectQuery::filtered(filter);
        query.order = self.ordering(options.get(ORDER_BY));
        query.columns = names(options.get(SELECT))
            .into_iter()
            .filter(|c| columns.contains(&c.as_str()) && self.schema.has_column(c))
            .collect();

        let bounded = !matches!(options.get(PAGINATE), Some(p) if is_off(p));
        let limit = match options.get(LIMIT).and_then(as_i64) {
            Some(-1) => None,
            Some(n) if n > 0 => Some(n as u64),
            _ => Some(self.page_size),
        };

        let (rows, pagination) = match limit.filter(|_| bounded) {
            Some(limit) => {
                let page = options.get(PAGE).and_then(as_i64).filter(|p| *p > 0).unwrap_or(1) as u64;
                // Offsets are bound as signed 64-bit integers.
                let offset = (page - 1)
                    .checked_mul(limit)
                    .filter(|offset| i64::try_from(*offset).is_ok())
                    .ok_or_else(|| ModelError::Validation(vec![format!("\"{}\" is out of range", PAGE)]))?;
                let row_count = self.store.count(&self.schema, query.filter.as_ref()).await?;
                query.limit = Some(limit);
                query.offset = Some(offset);
                let rows = self.store.fetch(&self.schema, &query).await?;
                let pagination = Pagination {
                    page,
                    page_size: limit,
                    row_count,
                    page_count: row_count.div_ceil(limit),
                };
                (rows, pagination)
            }
            None => {
                let rows = self.store.fetch(&self.schema, &query).await?;
                let row_count = rows.len() as u64;
                let pagination = Pagination {
                    page: 1,
                    page_size: row_count,
                    row_count,
                    page_count: u64::from(row_count > 0),
                };
                (rows, pagination)
            }
        };

        debug!(rows = rows.len(), row_count = pagination.row_count, "Listed rows");
        metrics::record_rows_read(self.table(), rows.len());

        let rows = rows
            .into_iter()
            .map(|row| self.schema.to_external(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { rows, pagination })
    }

    /// `order_by` names, `-` prefix for descending. Unknown columns are
    /// skipped; the primary key is the fallback.
    fn ordering(&self, order_by: Option<&JsonValue>) -> Vec<(String, SortOrder)> {
        let mut order: Vec<(String, SortOrder)> = names(order_by)
            .into_iter()
            .filter_map(|name| {
                let (column, direction) = match name.strip_prefix('-') {
                    Some(column) => (column.to_string(), SortOrder::Desc),
                    None => (name, SortOrder::Asc),
                };
                if self.schema.has_column(&column) {
                    Some((column, direction))
                } else {
                    debug!(column = %column, "Skipping unknown order_by column");
                    None
                }
            })
            .collect();
        if order.is_empty() {
            order.push((self.schema.primary_key().to_string(), SortOrder::Asc));
        }
        order
    }
}

/// A name or an array of names.
fn names(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `paginate: 0 | false | "0" | "false"`.
fn is_off(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => !b,
        JsonValue::String(s) => s == "0" || s.eq_ignore_ascii_case("false"),
        other => as_i64(other) == Some(0),
    }
}
