// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for modelbase.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `modelbase_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: table name
//! - `operation`: list, create_one, bulk_sync, ...
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a finished repository operation
pub fn record_operation(table: &str, operation: &str, status: &str) {
    counter!(
        "modelbase_operations_total",
        "table" => table.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(table: &str, operation: &str, duration: Duration) {
    histogram!(
        "modelbase_operation_seconds",
        "table" => table.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Rows inserted, updated or deleted
pub fn record_rows_written(table: &str, kind: &str, count: usize) {
    counter!(
        "modelbase_rows_written_total",
        "table" => table.to_string(),
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

/// Rows returned to callers
pub fn record_rows_read(table: &str, count: usize) {
    counter!(
        "modelbase_rows_read_total",
        "table" => table.to_string()
    )
    .increment(count as u64);
}

/// Size of each partition produced by a sync
pub fn record_sync_partition(table: &str, partition: &str, count: usize) {
    histogram!(
        "modelbase_sync_partition_rows",
        "table" => table.to_string(),
        "partition" => partition.to_string()
    )
    .record(count as f64);
}

pub fn record_validation_failure(table: &str, violations: usize) {
    counter!(
        "modelbase_validation_failures_total",
        "table" => table.to_string()
    )
    .increment(violations as u64);
}

pub fn record_rollback(table: &str, operation: &str) {
    counter!(
        "modelbase_rollbacks_total",
        "table" => table.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a storage connection failure
pub fn record_connection_error(backend: &str) {
    counter!(
        "modelbase_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a published lifecycle event
pub fn record_event(table: &str, event: &str) {
    counter!(
        "modelbase_events_total",
        "table" => table.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Current pool size
pub fn set_pool_connections(backend: &str, count: u32) {
    gauge!(
        "modelbase_pool_connections",
        "backend" => backend.to_string()
    )
    .set(count as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    table: String,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(table: &str, operation: &'static str) -> Self {
        Self {
            table: table.to_string(),
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(&self.table, self.operation, self.start.elapsed());
    }
}

/// Outcome label for a result
#[must_use]
pub fn status_of<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}
