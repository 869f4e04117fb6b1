use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{EngineError, ErrorKind};
use crate::types::{TableCopyError, TableCopyResult};

/// Lifecycle state of a cache job.
///
/// A job starts [`JobState::Running`] and moves exactly once to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running,
    /// Every table was copied.
    Complete,
    /// At least one table failed.
    Failed,
    /// The job aborted before finishing table iteration.
    Error,
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "RUNNING",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
            JobState::Error => "ERROR",
            JobState::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let state = match value {
            "RUNNING" => JobState::Running,
            "COMPLETE" => JobState::Complete,
            "FAILED" => JobState::Failed,
            "ERROR" => JobState::Error,
            "CANCELED" => JobState::Canceled,
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown job status",
                other
            ),
        };

        Ok(state)
    }
}

/// Durable record of a cache job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub database_code: String,
    pub job_id: String,
    pub status: JobState,
    pub schema_name: String,
    /// Masked description of the source.
    pub source: String,
    pub total_tables: u64,
    pub tables_completed: u64,
    pub tables_failed_count: u64,
    pub current_table: Option<String>,
    pub rows_copied: u64,
    pub tables_copied: Vec<TableCopyResult>,
    pub tables_failed: Vec<TableCopyError>,
    pub retry_count: u64,
    pub last_error: Option<String>,
    pub error: Option<String>,
    /// Redacted configuration the job was started with.
    pub config: Option<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Id of the job in the external tracker, when one registered it.
    pub external_job_id: Option<String>,
}

/// Condensed view of a job, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusSummary {
    pub database_code: String,
    pub job_id: String,
    pub status: JobState,
    pub total_tables: u64,
    pub tables_completed: u64,
    pub tables_failed_count: u64,
    pub current_table: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub external_job_id: Option<String>,
}

impl From<JobStatus> for JobStatusSummary {
    fn from(status: JobStatus) -> Self {
        Self {
            database_code: status.database_code,
            job_id: status.job_id,
            status: status.status,
            total_tables: status.total_tables,
            tables_completed: status.tables_completed,
            tables_failed_count: status.tables_failed_count,
            current_table: status.current_table,
            start_time: status.start_time,
            end_time: status.end_time,
            external_job_id: status.external_job_id,
        }
    }
}

/// Progress snapshot written while a job is running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobProgress {
    pub total_tables: usize,
    pub current_table: Option<String>,
    pub tables_copied: Vec<TableCopyResult>,
    pub tables_failed: Vec<TableCopyError>,
}

impl JobProgress {
    pub fn new(total_tables: usize) -> Self {
        Self {
            total_tables,
            ..Self::default()
        }
    }

    pub fn rows_copied(&self) -> u64 {
        self.tables_copied.iter().map(|table| table.rows_copied).sum()
    }
}
