//! Cache job orchestration.
//!
//! [`CacheEngine`] routes a [`CacheConfig`] to the native scanner or the cursor copy path,
//! iterates the tables to copy and records the job lifecycle in the [`JobStatusStore`]:
//!
//! ```text
//! RUNNING ──┬──> COMPLETE   every table copied
//!           ├──> FAILED     at least one table failed
//!           ├──> ERROR      the job aborted
//!           └──> CANCELED   a cancel request was observed between two tables
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use cache_config::shared::{CacheConfig, CopyStrategy};
use futures::{FutureExt, StreamExt, stream};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::copy::fts::build_fts_indexes;
use crate::copy::{
    NativeSource, NativeSourceFactory, TableCopyContext, copy_native_table, copy_table, destination_tables,
    tables_to_copy,
};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::identifier::{self, IdentifierKind};
use crate::jobs::{
    JobProgress, JobState, JobStatus, JobStatusStore, JobStatusSummary, JobTracker,
    NoopJobTracker, TrackerStatus,
};
use crate::progress::{NoopProgressSink, ProgressEvent, ProgressSink};
use crate::retry::with_retry;
use crate::source::{ConnectionPool, SourceDrivers};
use crate::store::AnalyticalStore;
use crate::types::{CacheResult, CopyPhase, TableCopyError, TableCopyResult, TypeMapping};
use crate::{bail, engine_error};

/// Prefix of the fatal error reported when the source cannot be reached.
const CONNECT_FAILURE: &str = "Failed to connect to source";

/// How a job ended, before its terminal state is written.
enum JobOutcome {
    Finished(JobProgress),
    Canceled(JobProgress),
    Fatal { error: String, progress: JobProgress },
}

impl JobOutcome {
    fn fatal(error: impl Into<String>) -> Self {
        JobOutcome::Fatal {
            error: error.into(),
            progress: JobProgress::default(),
        }
    }
}

/// Entry point of the cache engine.
///
/// Holds the analytical store, the job status store running on a session of its own, the source
/// driver registry and the external job tracker.
pub struct CacheEngine<S> {
    store: S,
    jobs: JobStatusStore<S>,
    drivers: SourceDrivers,
    native_sources: NativeSourceFactory,
    tracker: Arc<dyn JobTracker>,
    mapping: TypeMapping,
}

impl<S> CacheEngine<S>
where
    S: AnalyticalStore,
{
    /// Creates an engine over `store` with the built-in drivers and no external tracker.
    pub async fn new(store: S) -> EngineResult<Self> {
        let jobs = JobStatusStore::new(store.fork_session().await?).await?;

        Ok(Self {
            store,
            jobs,
            drivers: SourceDrivers::with_defaults(),
            native_sources: Arc::new(NativeSource::new),
            tracker: Arc::new(NoopJobTracker),
            mapping: TypeMapping::default(),
        })
    }

    pub fn with_drivers(mut self, drivers: SourceDrivers) -> Self {
        self.drivers = drivers;
        self
    }

    /// Replaces how native scanner sources are resolved, e.g. to attach a file snapshot.
    pub fn with_native_sources<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&CacheConfig) -> EngineResult<NativeSource> + Send + Sync + 'static,
    {
        self.native_sources = Arc::new(resolve);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn JobTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_type_mapping(mut self, mapping: TypeMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn drivers_mut(&mut self) -> &mut SourceDrivers {
        &mut self.drivers
    }

    /// Checks `config` without any I/O.
    pub fn validate_config(&self, config: &CacheConfig) -> EngineResult<()> {
        config.validate()?;

        identifier::validate(&config.database_code, IdentifierKind::DatabaseCode)?;
        identifier::validate(&config.schema_name, IdentifierKind::Schema)?;
        identifier::validate(config.target_schema(), IdentifierKind::Schema)?;

        if let Some(filter) = &config.table_filter {
            for table in filter.tables() {
                identifier::validate(table, IdentifierKind::Table)?;
                for column in filter.columns(table).unwrap_or_default() {
                    identifier::validate(column, IdentifierKind::Column)?;
                }
            }
        }

        for table in &config.fts_tables {
            identifier::validate(table, IdentifierKind::Table)?;
        }

        Ok(())
    }

    /// Creates or resumes the cache described by `config`.
    ///
    /// Invalid configurations are rejected before any I/O. Every other failure is reported
    /// through the returned [`CacheResult`] and the job status.
    pub async fn create_cache(
        &self,
        config: &CacheConfig,
        sink: Option<&dyn ProgressSink>,
    ) -> EngineResult<CacheResult> {
        self.validate_config(config)?;

        let span = info_span!(
            "cache_job",
            database_code = %config.database_code,
            dialect = %config.credentials.dialect(),
        );

        self.run_job(config, sink.unwrap_or(&NoopProgressSink))
            .instrument(span)
            .await
    }

    async fn run_job(
        &self,
        config: &CacheConfig,
        sink: &dyn ProgressSink,
    ) -> EngineResult<CacheResult> {
        let started = Instant::now();

        let job_id = self.jobs.create(config).await?;
        let tracker_job = self.tracker_start(config).await;
        if let Some(external_job_id) = tracker_job.as_deref()
            && let Err(err) = self
                .jobs
                .set_external_job_id(&config.database_code, external_job_id)
                .await
        {
            warn!(error = %err, "failed to store the external job id");
        }
        info!(
            job_id,
            source = %config.credentials.source_key(),
            "starting cache job"
        );

        let run = async {
            match config.credentials.dialect().strategy() {
                CopyStrategy::NativeScanner(_) => self.run_native(config, sink).await,
                CopyStrategy::JdbcBatch(_) => self.run_cursor(config, sink).await,
            }
        };
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => self.abort_after_panic(panic).await,
        };

        Ok(self
            .finish(config, outcome, started, tracker_job.as_deref(), sink)
            .await)
    }

    async fn run_cursor(&self, config: &CacheConfig, sink: &dyn ProgressSink) -> JobOutcome {
        let pool = match self.open_pool(config).await {
            Ok(pool) => pool,
            Err(err) => return JobOutcome::fatal(connect_failure(&err)),
        };

        let scoped = pool
            .run_scoped(|pool| async move { self.copy_from_pool(&pool, config, sink).await })
            .await;

        match scoped {
            Ok(outcome) => outcome,
            Err(panic) => self.abort_after_panic(panic).await,
        }
    }

    async fn open_pool(&self, config: &CacheConfig) -> EngineResult<ConnectionPool> {
        let driver = self.drivers.get(config.credentials.dialect())?;

        ConnectionPool::open(
            driver,
            config.credentials.clone(),
            config.pool.clone(),
            config.use_pooling,
        )
        .await
    }

    async fn copy_from_pool(
        &self,
        pool: &ConnectionPool,
        config: &CacheConfig,
        sink: &dyn ProgressSink,
    ) -> JobOutcome {
        let available = async {
            let mut conn = pool.get().await?;
            conn.list_tables(&config.schema_name).await
        };
        let tables = match self.prepare_tables(config, available).await {
            Ok(tables) => tables,
            Err(err) => return JobOutcome::fatal(err.to_string()),
        };

        let ctx = TableCopyContext::new(config, &self.mapping, sink);
        let ctx = &ctx;
        self.copy_tables(config, sink, tables, |table| async move {
            copy_table(pool, &self.store, ctx, &table).await
        })
        .await
    }

    async fn run_native(&self, config: &CacheConfig, sink: &dyn ProgressSink) -> JobOutcome {
        let source = match (self.native_sources)(config) {
            Ok(source) => source,
            Err(err) => return JobOutcome::fatal(err.to_string()),
        };

        if let Err(err) = source.attach(&self.store).await {
            return JobOutcome::fatal(connect_failure(&err));
        }

        let copied = AssertUnwindSafe(self.copy_from_native(&source, config, sink))
            .catch_unwind()
            .await;

        if let Err(err) = source.detach(&self.store).await {
            warn!(alias = source.alias(), error = %err, "failed to detach native source");
        }

        match copied {
            Ok(outcome) => outcome,
            Err(panic) => self.abort_after_panic(panic).await,
        }
    }

    async fn copy_from_native(
        &self,
        source: &NativeSource,
        config: &CacheConfig,
        sink: &dyn ProgressSink,
    ) -> JobOutcome {
        let available = source.list_tables(&self.store, &config.schema_name);
        let tables = match self.prepare_tables(config, available).await {
            Ok(tables) => tables,
            Err(err) => return JobOutcome::fatal(err.to_string()),
        };

        let alias = source.alias();
        if config.parallel_copy && tables.len() > 1 {
            return self.copy_tables_parallel(config, sink, tables, alias).await;
        }

        self.copy_tables(config, sink, tables, |table| async move {
            copy_native_table(&self.store, config, alias, &table).await
        })
        .await
    }

    /// Attaches the cache, creates its schema and resolves the tables to copy.
    async fn prepare_tables<F>(&self, config: &CacheConfig, available: F) -> EngineResult<Vec<String>>
    where
        F: Future<Output = EngineResult<Vec<String>>>,
    {
        let code = config.database_code.as_str();
        let schema = config.target_schema();

        if !self.is_attached(code).await? {
            self.store.attach_file(&config.cache_file(), code).await?;
            info!(path = %config.cache_file().display(), "cache attached");
        }

        self.store
            .execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}.{}",
                identifier::quote_database_code(code)?,
                identifier::escape(schema, IdentifierKind::Schema)?
            ))
            .await?;

        let available = available.await?;
        let existing = if config.resume {
            Some(destination_tables(&self.store, code, schema).await?)
        } else {
            None
        };

        let tables = tables_to_copy(available, config.table_filter.as_ref(), existing.as_ref());
        debug!(tables = ?tables, "tables resolved");

        Ok(tables)
    }

    /// Copies `tables` one after the other, polling for cancellation before each of them.
    async fn copy_tables<F, Fut>(
        &self,
        config: &CacheConfig,
        sink: &dyn ProgressSink,
        tables: Vec<String>,
        copy: F,
    ) -> JobOutcome
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<TableCopyResult, TableCopyError>>,
    {
        let code = config.database_code.as_str();
        let total = tables.len();
        let mut progress = JobProgress::new(total);

        self.save_progress(code, &progress).await;
        sink.emit(ProgressEvent::JobStart {
            database_code: code.to_owned(),
            total_tables: total,
        });

        for (index, table) in tables.into_iter().enumerate() {
            if self.is_canceled(code).await {
                info!(table, "cancel requested, stopping before table");
                return JobOutcome::Canceled(progress);
            }

            sink.emit(ProgressEvent::TableStart {
                table: table.clone(),
                index: index + 1,
                total,
            });
            progress.current_table = Some(table.clone());
            self.save_progress(code, &progress).await;

            let result = self.copy_with_retry(config, || copy(table.clone())).await;
            self.record_result(sink, &mut progress, result);
            self.save_progress(code, &progress).await;
        }

        progress.current_table = None;
        JobOutcome::Finished(progress)
    }

    /// Copies native tables concurrently, each on a store session of its own.
    async fn copy_tables_parallel(
        &self,
        config: &CacheConfig,
        sink: &dyn ProgressSink,
        tables: Vec<String>,
        alias: &str,
    ) -> JobOutcome {
        let code = config.database_code.as_str();
        let total = tables.len();
        let mut progress = JobProgress::new(total);

        self.save_progress(code, &progress).await;
        sink.emit(ProgressEvent::JobStart {
            database_code: code.to_owned(),
            total_tables: total,
        });

        let mut copies = stream::iter(tables.into_iter().enumerate())
            .map(|(index, table)| async move {
                if self.is_canceled(code).await {
                    return None;
                }

                sink.emit(ProgressEvent::TableStart {
                    table: table.clone(),
                    index: index + 1,
                    total,
                });

                Some(self.copy_on_session(config, alias, table).await)
            })
            .buffer_unordered(config.max_parallel_tables.max(1));

        let mut canceled = false;
        while let Some(copied) = copies.next().await {
            match copied {
                Some(result) => {
                    self.record_result(sink, &mut progress, result);
                    self.save_progress(code, &progress).await;
                }
                None => canceled = true,
            }
        }

        if canceled {
            info!("cancel requested, remaining tables skipped");
            return JobOutcome::Canceled(progress);
        }

        JobOutcome::Finished(progress)
    }

    async fn copy_on_session(
        &self,
        config: &CacheConfig,
        alias: &str,
        table: String,
    ) -> Result<TableCopyResult, TableCopyError> {
        let session = self.store.fork_session().await.map_err(|err| TableCopyError {
            table: table.clone(),
            error: err.to_string(),
            phase: CopyPhase::Copy,
            transient: err.is_transient(),
        })?;

        let result = self
            .copy_with_retry(config, || {
                copy_native_table(&session, config, alias, &table)
            })
            .await;

        if let Err(err) = session.close().await {
            debug!(table, error = %err, "failed to close copy session");
        }

        result
    }

    async fn copy_with_retry<Op, Fut>(
        &self,
        config: &CacheConfig,
        operation: Op,
    ) -> Result<TableCopyResult, TableCopyError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<TableCopyResult, TableCopyError>>,
    {
        let code = config.database_code.as_str();

        with_retry(&config.retry, operation, |attempt, err: &TableCopyError| {
            let error = err.error.clone();
            async move {
                if let Err(err) = self.jobs.record_retry(code, attempt, &error).await {
                    warn!(error = %err, "failed to record retry");
                }
            }
        })
        .await
    }

    fn record_result(
        &self,
        sink: &dyn ProgressSink,
        progress: &mut JobProgress,
        result: Result<TableCopyResult, TableCopyError>,
    ) {
        match result {
            Ok(copied) => {
                sink.emit(ProgressEvent::TableComplete {
                    table: copied.table.clone(),
                    rows_copied: copied.rows_copied,
                    duration_ms: copied.duration_ms,
                });
                progress.tables_copied.push(copied);
            }
            Err(failed) => {
                sink.emit(ProgressEvent::TableFailed {
                    table: failed.table.clone(),
                    error: failed.error.clone(),
                });
                progress.tables_failed.push(failed);
            }
        }
    }

    async fn finish(
        &self,
        config: &CacheConfig,
        outcome: JobOutcome,
        started: Instant,
        tracker_job: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> CacheResult {
        let code = config.database_code.as_str();

        let (progress, fts_tables, state, error) = match outcome {
            JobOutcome::Finished(progress) => {
                let fts_tables =
                    build_fts_indexes(&self.store, config, &progress.tables_copied).await;
                let state = if progress.tables_failed.is_empty() {
                    JobState::Complete
                } else {
                    JobState::Failed
                };
                (progress, fts_tables, state, None)
            }
            JobOutcome::Canceled(progress) => (progress, Vec::new(), JobState::Canceled, None),
            JobOutcome::Fatal { error, progress } => {
                (progress, Vec::new(), JobState::Error, Some(error))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let status_error = match (&error, state) {
            (Some(error), _) => Some(error.clone()),
            (None, JobState::Failed) => Some(format!(
                "{} of {} tables failed",
                progress.tables_failed.len(),
                progress.total_tables
            )),
            _ => None,
        };

        self.save_progress(code, &progress).await;
        let written = match self
            .jobs
            .update_status(code, state, status_error.as_deref())
            .await
        {
            Ok(written) => written,
            Err(err) => {
                error!(error = %err, %state, "failed to write terminal job status");
                true
            }
        };
        let canceled = state == JobState::Canceled || (!written && self.is_canceled(code).await);

        match &error {
            Some(error) => sink.emit(ProgressEvent::JobFailed {
                error: error.clone(),
            }),
            None => sink.emit(ProgressEvent::JobComplete {
                tables_copied: progress.tables_copied.len(),
                tables_failed: progress.tables_failed.len(),
                duration_ms,
            }),
        }

        let tracker_status = match state {
            JobState::Complete => TrackerStatus::Completed,
            JobState::Canceled => TrackerStatus::Stopped,
            _ if canceled => TrackerStatus::Stopped,
            _ => TrackerStatus::Failed,
        };
        self.tracker_update(tracker_job, tracker_status).await;

        let result = CacheResult {
            success: error.is_none() && !canceled && progress.tables_failed.is_empty(),
            database_code: code.to_owned(),
            schema_name: config.target_schema().to_owned(),
            tables_copied: progress.tables_copied,
            tables_failed: progress.tables_failed,
            fts_tables,
            duration_ms,
            error,
            canceled,
        };

        info!(
            success = result.success,
            canceled = result.canceled,
            tables_copied = result.tables_copied.len(),
            tables_failed = result.tables_failed.len(),
            rows = result.total_rows(),
            duration_ms,
            "cache job finished"
        );

        result
    }

    /// Fails the job after a panic, discarding any copy transaction left open.
    async fn abort_after_panic(&self, panic: Box<dyn Any + Send>) -> JobOutcome {
        let error = panic_message(panic);
        if let Err(err) = self.store.rollback().await {
            debug!(error = %err, "no copy transaction to discard");
        }

        JobOutcome::fatal(error)
    }

    async fn save_progress(&self, database_code: &str, progress: &JobProgress) {
        if let Err(err) = self.jobs.update_progress(database_code, progress).await {
            warn!(error = %err, "failed to save job progress");
        }
    }

    async fn is_canceled(&self, database_code: &str) -> bool {
        match self.jobs.get_status(database_code).await {
            Ok(Some(status)) => status.status == JobState::Canceled,
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "failed to poll job status");
                false
            }
        }
    }

    async fn tracker_start(&self, config: &CacheConfig) -> Option<String> {
        let params = match serde_json::to_value(config.redacted()) {
            Ok(params) => params,
            Err(err) => {
                warn!(error = %err, "failed to serialize job parameters for the tracker");
                return None;
            }
        };

        match self
            .tracker
            .write_job(&format!("cache-{}", config.database_code), &params)
            .await
        {
            Ok(job_id) if job_id.is_empty() => None,
            Ok(job_id) => Some(job_id),
            Err(err) => {
                warn!(error = %err, "failed to register job with the tracker");
                None
            }
        }
    }

    async fn tracker_update(&self, job_id: Option<&str>, status: TrackerStatus) {
        let Some(job_id) = job_id else {
            return;
        };

        if let Err(err) = self.tracker.update_job_status(job_id, status).await {
            warn!(job_id, %status, error = %err, "failed to update job in the tracker");
        }
    }

    pub async fn get_job_status(&self, database_code: &str) -> EngineResult<Option<JobStatus>> {
        self.jobs.get_status(database_code).await
    }

    pub async fn list_jobs(&self, status: Option<JobState>) -> EngineResult<Vec<JobStatusSummary>> {
        self.jobs.list(status).await
    }

    /// Requests cancellation of a running job. The job stops before its next table.
    pub async fn cancel_job(&self, database_code: &str) -> EngineResult<()> {
        let Some(status) = self.jobs.get_status(database_code).await? else {
            bail!(ErrorKind::JobNotFound, "No cache job found", database_code);
        };

        if status.status != JobState::Running {
            bail!(
                ErrorKind::InvalidState,
                "Only running jobs can be canceled",
                format!("job `{database_code}` is {}", status.status)
            );
        }

        if !self
            .jobs
            .update_status(database_code, JobState::Canceled, None)
            .await?
        {
            bail!(
                ErrorKind::InvalidState,
                "Job finished before it could be canceled",
                database_code
            );
        }

        info!(database_code, "cache job cancel requested");

        Ok(())
    }

    /// Returns `true` when the cache of `database_code` is attached to the store.
    pub async fn is_attached(&self, database_code: &str) -> EngineResult<bool> {
        identifier::validate(database_code, IdentifierKind::DatabaseCode)?;

        let rows = self
            .store
            .query_params(
                "SELECT DISTINCT catalog_name FROM information_schema.schemata \
                 WHERE catalog_name = ?",
                &[database_code.into()],
            )
            .await?;

        Ok(!rows.is_empty())
    }

    /// Detaches the cache of `database_code` from the store.
    pub async fn detach(&self, database_code: &str) -> EngineResult<()> {
        if !self.is_attached(database_code).await? {
            bail!(
                ErrorKind::InvalidState,
                "Cache is not attached",
                database_code
            );
        }

        self.store.detach(database_code).await?;
        info!(database_code, "cache detached");

        Ok(())
    }
}

fn connect_failure(err: &EngineError) -> String {
    let detail = err.detail().map(str::to_owned).unwrap_or_else(|| err.to_string());
    format!("{CONNECT_FAILURE}: {detail}")
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    let err = engine_error!(
        ErrorKind::InvalidState,
        "Cache job panicked",
        message
    );
    error!(error = %err, "cache job panicked");

    err.to_string()
}

#[cfg(test)]
mod tests {
    use cache_config::shared::{Dialect, SourceCredentials, TableFilter};

    use super::*;
    use crate::store::DuckDbStore;

    async fn engine() -> CacheEngine<DuckDbStore> {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        CacheEngine::new(store).await.unwrap()
    }

    fn config(code: &str) -> CacheConfig {
        CacheConfig::new(code, "main", SourceCredentials::embedded("/tmp/missing.duckdb"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_identifiers_are_rejected_before_any_io() {
        let engine = engine().await;

        let mut config = config("acme");
        config.table_filter = Some(TableFilter::new().with_table("person; DROP", ["person_id"]));
        let err = engine.create_cache(&config, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let err = engine
            .create_cache(&self::config("bad code"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        assert!(engine.list_jobs(None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_driver_is_a_connection_failure() {
        let engine = engine().await.with_drivers(SourceDrivers::new());
        let tmp = tempfile::tempdir().unwrap();

        let mut config = CacheConfig::new(
            "acme",
            "dbo",
            SourceCredentials::jdbc(
                Dialect::SqlServer,
                "jdbc:sqlserver://db:1433;databaseName=cdm",
                Some("sa".to_string()),
                None,
            ),
        );
        config.cache_path = tmp.path().to_path_buf();

        let result = engine.create_cache(&config, None).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Failed to connect to source"));

        let status = engine.get_job_status("acme").await.unwrap().unwrap();
        assert_eq!(status.status, JobState::Error);
        assert!(!engine.is_attached("acme").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_requires_a_running_job() {
        let engine = engine().await;

        let err = engine.cancel_job("acme").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JobNotFound);

        engine.jobs.create(&config("acme")).await.unwrap();
        engine.cancel_job("acme").await.unwrap();

        let err = engine.cancel_job("acme").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            engine.get_job_status("acme").await.unwrap().unwrap().status,
            JobState::Canceled
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn detach_fails_for_unknown_cache() {
        let engine = engine().await;
        assert!(!engine.is_attached("acme").await.unwrap());

        let err = engine.detach("acme").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let message = panic_message(Box::new("table iteration exploded"));
        assert!(message.contains("table iteration exploded"));

        let message = panic_message(Box::new(42_u8));
        assert!(message.contains("unknown panic payload"));
    }
}
