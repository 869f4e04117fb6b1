//! Job status table kept in the analytical store.

use std::str::FromStr;

use cache_config::shared::CacheConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversions::{Cell, TableRow};
use crate::error::{EngineResult, ErrorKind};
use crate::jobs::{JobProgress, JobState, JobStatus, JobStatusSummary};
use crate::store::AnalyticalStore;
use crate::{bail, engine_error};

/// Name of the job status table, created in the store's default catalog.
pub const JOBS_TABLE: &str = "cache_jobs";

const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache_jobs (
    database_code VARCHAR PRIMARY KEY,
    job_id VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    schema_name VARCHAR NOT NULL,
    source VARCHAR NOT NULL,
    total_tables BIGINT NOT NULL DEFAULT 0,
    tables_completed BIGINT NOT NULL DEFAULT 0,
    tables_failed_count BIGINT NOT NULL DEFAULT 0,
    current_table VARCHAR,
    rows_copied BIGINT NOT NULL DEFAULT 0,
    tables_copied VARCHAR,
    tables_failed VARCHAR,
    retry_count BIGINT NOT NULL DEFAULT 0,
    last_error VARCHAR,
    error VARCHAR,
    config VARCHAR,
    start_time VARCHAR NOT NULL,
    end_time VARCHAR,
    external_job_id VARCHAR
)"#;

/// Brings job tables created before external tracking up to date.
const MIGRATE_JOBS_TABLE: &str =
    "ALTER TABLE cache_jobs ADD COLUMN IF NOT EXISTS external_job_id VARCHAR";

const STATUS_COLUMNS: &str = "database_code, job_id, status, schema_name, source, total_tables, \
     tables_completed, tables_failed_count, current_table, rows_copied, tables_copied, \
     tables_failed, retry_count, last_error, error, config, start_time, end_time, external_job_id";

/// Durable job records keyed by database code.
///
/// Every write is parameterized. The store should be a session of its own so that job updates
/// are never part of a table copy transaction.
#[derive(Debug, Clone)]
pub struct JobStatusStore<S> {
    store: S,
}

impl<S> JobStatusStore<S>
where
    S: AnalyticalStore,
{
    /// Wraps `store`, creating the job table when missing.
    pub async fn new(store: S) -> EngineResult<Self> {
        store.execute(CREATE_JOBS_TABLE).await?;
        store.execute(MIGRATE_JOBS_TABLE).await?;

        Ok(Self { store })
    }

    /// Records a new running job for `config`, replacing any previous record of the same cache.
    ///
    /// Every column is written, so nothing of the replaced record survives.
    pub async fn create(&self, config: &CacheConfig) -> EngineResult<String> {
        let job_id = Uuid::new_v4().to_string();
        let snapshot = serde_json::to_string(&config.redacted())?;

        self.store
            .execute_params(
                &format!(
                    "INSERT OR REPLACE INTO cache_jobs ({STATUS_COLUMNS}) \
                     VALUES (?, ?, ?, ?, ?, 0, 0, 0, NULL, 0, '[]', '[]', 0, NULL, NULL, ?, ?, \
                     NULL, NULL)"
                ),
                &[
                    config.database_code.as_str().into(),
                    job_id.as_str().into(),
                    JobState::Running.as_str().into(),
                    config.schema_name.as_str().into(),
                    config.credentials.source_key().into(),
                    snapshot.into(),
                    timestamp(Utc::now()).into(),
                ],
            )
            .await?;

        info!(database_code = %config.database_code, job_id, "cache job created");

        Ok(job_id)
    }

    /// Writes a progress snapshot of a running job.
    pub async fn update_progress(
        &self,
        database_code: &str,
        progress: &JobProgress,
    ) -> EngineResult<()> {
        let tables_copied = serde_json::to_string(&progress.tables_copied)?;
        let tables_failed = serde_json::to_string(&progress.tables_failed)?;

        self.store
            .execute_params(
                "UPDATE cache_jobs SET total_tables = ?, tables_completed = ?, \
                 tables_failed_count = ?, current_table = ?, rows_copied = ?, tables_copied = ?, \
                 tables_failed = ? WHERE database_code = ? AND status = 'RUNNING'",
                &[
                    count(progress.total_tables)?,
                    count(progress.tables_copied.len())?,
                    count(progress.tables_failed.len())?,
                    progress.current_table.clone().into(),
                    Cell::I64(i64::try_from(progress.rows_copied())?),
                    tables_copied.into(),
                    tables_failed.into(),
                    database_code.into(),
                ],
            )
            .await?;

        Ok(())
    }

    /// Moves a job to `status`.
    ///
    /// Terminal transitions only apply to a running job and set the end time. Returns `false`
    /// when the job was no longer running, i.e. another terminal state won.
    pub async fn update_status(
        &self,
        database_code: &str,
        status: JobState,
        error: Option<&str>,
    ) -> EngineResult<bool> {
        let changed = if status.is_terminal() {
            self.store
                .execute_params(
                    "UPDATE cache_jobs SET status = ?, error = ?, current_table = NULL, \
                     end_time = ? WHERE database_code = ? AND status = 'RUNNING'",
                    &[
                        status.as_str().into(),
                        error.into(),
                        timestamp(Utc::now()).into(),
                        database_code.into(),
                    ],
                )
                .await?
        } else {
            self.store
                .execute_params(
                    "UPDATE cache_jobs SET status = ?, error = ?, end_time = NULL \
                     WHERE database_code = ?",
                    &[status.as_str().into(), error.into(), database_code.into()],
                )
                .await?
        };

        debug!(database_code, %status, changed, "job status updated");

        Ok(changed > 0)
    }

    /// Stores the id an external tracker assigned to the job.
    pub async fn set_external_job_id(
        &self,
        database_code: &str,
        external_job_id: &str,
    ) -> EngineResult<()> {
        self.store
            .execute_params(
                "UPDATE cache_jobs SET external_job_id = ? WHERE database_code = ?",
                &[external_job_id.into(), database_code.into()],
            )
            .await?;

        Ok(())
    }

    /// Stores the retry count and the failure that caused the latest retry.
    pub async fn record_retry(
        &self,
        database_code: &str,
        attempt: u32,
        error: &str,
    ) -> EngineResult<()> {
        self.store
            .execute_params(
                "UPDATE cache_jobs SET retry_count = retry_count + 1, last_error = ? \
                 WHERE database_code = ? AND status = 'RUNNING'",
                &[error.into(), database_code.into()],
            )
            .await?;

        debug!(database_code, attempt, "job retry recorded");

        Ok(())
    }

    pub async fn get_status(&self, database_code: &str) -> EngineResult<Option<JobStatus>> {
        let rows = self
            .store
            .query_params(
                &format!("SELECT {STATUS_COLUMNS} FROM cache_jobs WHERE database_code = ?"),
                &[database_code.into()],
            )
            .await?;

        rows.first().map(job_status).transpose()
    }

    /// Lists jobs, most recently started first, optionally restricted to one state.
    pub async fn list(&self, status: Option<JobState>) -> EngineResult<Vec<JobStatusSummary>> {
        let rows = match status {
            Some(status) => {
                self.store
                    .query_params(
                        &format!(
                            "SELECT {STATUS_COLUMNS} FROM cache_jobs WHERE status = ? \
                             ORDER BY start_time DESC"
                        ),
                        &[status.as_str().into()],
                    )
                    .await?
            }
            None => {
                self.store
                    .query(&format!(
                        "SELECT {STATUS_COLUMNS} FROM cache_jobs ORDER BY start_time DESC"
                    ))
                    .await?
            }
        };

        rows.iter()
            .map(|row| job_status(row).map(JobStatusSummary::from))
            .collect()
    }

    /// Closes the underlying store session.
    pub async fn close(&self) -> EngineResult<()> {
        self.store.close().await
    }
}

fn count(value: usize) -> EngineResult<Cell> {
    Ok(Cell::I64(i64::try_from(value)?))
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> EngineResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn required_string(row: &TableRow, index: usize) -> EngineResult<String> {
    match row.get_string(index)? {
        Some(value) => Ok(value),
        None => bail!(
            ErrorKind::InvalidData,
            "Job status row has a null required column",
            format!("column {index}")
        ),
    }
}

fn unsigned(row: &TableRow, index: usize) -> EngineResult<u64> {
    let value = row.get_i64(index)?.unwrap_or(0);

    u64::try_from(value).map_err(|_| {
        engine_error!(
            ErrorKind::InvalidData,
            "Job status row has a negative counter",
            format!("column {index} holds {value}")
        )
    })
}

fn json_column<T>(row: &TableRow, index: usize) -> EngineResult<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    row.get_string(index)?
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(Into::into)
}

fn job_status(row: &TableRow) -> EngineResult<JobStatus> {
    Ok(JobStatus {
        database_code: required_string(row, 0)?,
        job_id: required_string(row, 1)?,
        status: JobState::from_str(&required_string(row, 2)?)?,
        schema_name: required_string(row, 3)?,
        source: required_string(row, 4)?,
        total_tables: unsigned(row, 5)?,
        tables_completed: unsigned(row, 6)?,
        tables_failed_count: unsigned(row, 7)?,
        current_table: row.get_string(8)?,
        rows_copied: unsigned(row, 9)?,
        tables_copied: json_column(row, 10)?.unwrap_or_default(),
        tables_failed: json_column(row, 11)?.unwrap_or_default(),
        retry_count: unsigned(row, 12)?,
        last_error: row.get_string(13)?,
        error: row.get_string(14)?,
        config: json_column(row, 15)?,
        start_time: parse_timestamp(&required_string(row, 16)?)?,
        end_time: row
            .get_string(17)?
            .map(|value| parse_timestamp(&value))
            .transpose()?,
        external_job_id: row.get_string(18)?,
    })
}

#[cfg(test)]
mod tests {
    use cache_config::shared::{Dialect, SourceCredentials};

    use super::*;
    use crate::store::DuckDbStore;
    use crate::types::{CopyPhase, TableCopyError, TableCopyResult};

    fn config(code: &str) -> CacheConfig {
        CacheConfig::new(
            code,
            "public",
            SourceCredentials::native(
                Dialect::Postgres,
                "db.internal",
                None,
                "cdm",
                "reader",
                Some("s3cret".into()),
            ),
        )
    }

    async fn jobs() -> JobStatusStore<DuckDbStore> {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        JobStatusStore::new(store).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn created_job_is_running_without_secrets() {
        let jobs = jobs().await;
        let job_id = jobs.create(&config("acme")).await.unwrap();

        let status = jobs.get_status("acme").await.unwrap().unwrap();
        assert_eq!(status.job_id, job_id);
        assert_eq!(status.status, JobState::Running);
        assert_eq!(status.schema_name, "public");
        assert!(status.end_time.is_none());
        assert!(status.tables_copied.is_empty());

        let snapshot = status.config.unwrap().to_string();
        assert!(!snapshot.contains("s3cret"));
        assert!(snapshot.contains("db.internal"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_job_has_no_status() {
        let jobs = jobs().await;
        assert!(jobs.get_status("unknown").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn progress_snapshots_are_stored() {
        let jobs = jobs().await;
        jobs.create(&config("acme")).await.unwrap();

        let progress = JobProgress {
            total_tables: 3,
            current_table: Some("visit_occurrence".to_string()),
            tables_copied: vec![TableCopyResult {
                table: "person".to_string(),
                rows_copied: 42,
                duration_ms: 7,
            }],
            tables_failed: vec![TableCopyError {
                table: "note".to_string(),
                error: "it's broken".to_string(),
                phase: CopyPhase::Data,
                transient: false,
            }],
        };
        jobs.update_progress("acme", &progress).await.unwrap();
        jobs.record_retry("acme", 1, "connection reset").await.unwrap();

        let status = jobs.get_status("acme").await.unwrap().unwrap();
        assert_eq!(status.total_tables, 3);
        assert_eq!(status.tables_completed, 1);
        assert_eq!(status.tables_failed_count, 1);
        assert_eq!(status.rows_copied, 42);
        assert_eq!(status.current_table.as_deref(), Some("visit_occurrence"));
        assert_eq!(status.tables_copied, progress.tables_copied);
        assert_eq!(status.tables_failed[0].error, "it's broken");
        assert_eq!(status.retry_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminal_state_is_written_once() {
        let jobs = jobs().await;
        jobs.create(&config("acme")).await.unwrap();

        assert!(jobs
            .update_status("acme", JobState::Canceled, None)
            .await
            .unwrap());
        assert!(!jobs
            .update_status("acme", JobState::Complete, None)
            .await
            .unwrap());

        let status = jobs.get_status("acme").await.unwrap().unwrap();
        assert_eq!(status.status, JobState::Canceled);
        assert!(status.end_time.is_some());
        assert!(status.current_table.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_replaces_a_finished_job() {
        let jobs = jobs().await;
        let first = jobs.create(&config("acme")).await.unwrap();
        jobs.set_external_job_id("acme", "tracker-1").await.unwrap();
        jobs.update_progress(
            "acme",
            &JobProgress {
                total_tables: 2,
                current_table: Some("person".to_string()),
                ..JobProgress::default()
            },
        )
        .await
        .unwrap();
        jobs.record_retry("acme", 1, "connection reset").await.unwrap();
        jobs.update_status("acme", JobState::Error, Some("boom"))
            .await
            .unwrap();

        let second = jobs.create(&config("acme")).await.unwrap();
        assert_ne!(first, second);

        let status = jobs.get_status("acme").await.unwrap().unwrap();
        assert_eq!(status.job_id, second);
        assert_eq!(status.status, JobState::Running);
        assert_eq!(status.total_tables, 0);
        assert_eq!(status.retry_count, 0);
        assert!(status.error.is_none());
        assert!(status.end_time.is_none());
        assert!(status.last_error.is_none());
        assert!(status.current_table.is_none());
        assert!(status.external_job_id.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn external_job_id_is_stored_and_listed() {
        let jobs = jobs().await;
        jobs.create(&config("acme")).await.unwrap();
        jobs.set_external_job_id("acme", "tracker-7").await.unwrap();

        let status = jobs.get_status("acme").await.unwrap().unwrap();
        assert_eq!(status.external_job_id.as_deref(), Some("tracker-7"));

        let listed = jobs.list(None).await.unwrap();
        assert_eq!(listed[0].external_job_id.as_deref(), Some("tracker-7"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn listing_filters_by_state_newest_first() {
        let jobs = jobs().await;
        for code in ["first", "second", "third"] {
            jobs.create(&config(code)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        jobs.update_status("second", JobState::Complete, None)
            .await
            .unwrap();

        let all = jobs.list(None).await.unwrap();
        let codes: Vec<_> = all.iter().map(|job| job.database_code.as_str()).collect();
        assert_eq!(codes, vec!["third", "second", "first"]);

        let running = jobs.list(Some(JobState::Running)).await.unwrap();
        let codes: Vec<_> = running.iter().map(|job| job.database_code.as_str()).collect();
        assert_eq!(codes, vec!["third", "first"]);
    }
}
