//! Progress events reported while a cache is created.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Version of the [`ProgressEvent`] schema. Bumped whenever a variant or field changes.
pub const PROGRESS_EVENT_VERSION: u32 = 1;

/// A single progress notification.
///
/// Events of one job are delivered in order: `job-start`, then for every table `table-start`,
/// any number of `row-progress` and either `table-complete` or `table-failed`, and finally
/// `job-complete` or `job-failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    JobStart {
        database_code: String,
        total_tables: usize,
    },
    TableStart {
        table: String,
        index: usize,
        total: usize,
    },
    RowProgress {
        table: String,
        rows_processed: u64,
        estimated_rows: Option<u64>,
    },
    TableComplete {
        table: String,
        rows_copied: u64,
        duration_ms: u64,
    },
    TableFailed {
        table: String,
        error: String,
    },
    JobComplete {
        tables_copied: usize,
        tables_failed: usize,
        duration_ms: u64,
    },
    JobFailed {
        error: String,
    },
}

impl ProgressEvent {
    /// The `type` tag of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::JobStart { .. } => "job-start",
            ProgressEvent::TableStart { .. } => "table-start",
            ProgressEvent::RowProgress { .. } => "row-progress",
            ProgressEvent::TableComplete { .. } => "table-complete",
            ProgressEvent::TableFailed { .. } => "table-failed",
            ProgressEvent::JobComplete { .. } => "job-complete",
            ProgressEvent::JobFailed { .. } => "job-failed",
        }
    }
}

/// Receives progress events synchronously during cache creation.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Logs every event with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::JobStart {
                database_code,
                total_tables,
            } => info!(database_code, total_tables, "cache job started"),
            ProgressEvent::TableStart {
                table,
                index,
                total,
            } => info!(table, index, total, "copying table"),
            ProgressEvent::RowProgress {
                table,
                rows_processed,
                estimated_rows,
            } => info!(table, rows = rows_processed, ?estimated_rows, "copy progress"),
            ProgressEvent::TableComplete {
                table,
                rows_copied,
                duration_ms,
            } => info!(table, rows = rows_copied, duration_ms, "table copied"),
            ProgressEvent::TableFailed { table, error } => {
                warn!(table, error, "table copy failed")
            }
            ProgressEvent::JobComplete {
                tables_copied,
                tables_failed,
                duration_ms,
            } => info!(tables_copied, tables_failed, duration_ms, "cache job finished"),
            ProgressEvent::JobFailed { error } => warn!(error, "cache job failed"),
        }
    }
}
