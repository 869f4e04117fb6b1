use std::sync::Arc;

use cache::{CacheEngine, ErrorKind};
use cache::jobs::{JobState, JobStatusStore, MemoryJobTracker, TrackerStatus};
use cache::progress::{ProgressEvent, ProgressSink};
use cache::store::{AnalyticalStore, DuckDbStore};
use cache::test_utils::database::test_config;
use cache::test_utils::sink::RecordingSink;
use cache_config::shared::{Dialect, SourceCredentials};
use tokio::runtime::Handle;

use crate::common::{setup, spawn_engine};

mod common;

/// Cancels the job as soon as its first table is copied.
struct CancelAfterFirstTable {
    jobs: JobStatusStore<DuckDbStore>,
    database_code: String,
    recorded: RecordingSink,
}

impl ProgressSink for CancelAfterFirstTable {
    fn emit(&self, event: ProgressEvent) {
        let first_copied = matches!(event, ProgressEvent::TableComplete { .. });
        self.recorded.emit(event);

        if first_copied {
            tokio::task::block_in_place(|| {
                Handle::current().block_on(async {
                    self.jobs
                        .update_status(&self.database_code, JobState::Canceled, None)
                        .await
                        .unwrap();
                })
            });
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_stops_the_job_before_the_next_table() {
    let dirs = setup();
    let store = DuckDbStore::open_in_memory().await.unwrap();
    let jobs = JobStatusStore::new(store.fork_session().await.unwrap())
        .await
        .unwrap();
    let tracker = MemoryJobTracker::new();
    let engine = CacheEngine::new(store)
        .await
        .unwrap()
        .with_tracker(Arc::new(tracker.clone()));
    let config = test_config("acme", &dirs.source, &dirs.cache_dir);
    let sink = CancelAfterFirstTable {
        jobs,
        database_code: "acme".to_string(),
        recorded: RecordingSink::new(),
    };

    let result = engine.create_cache(&config, Some(&sink)).await.unwrap();

    assert!(!result.success);
    assert!(result.canceled);
    assert!(result.error.is_none());
    assert_eq!(result.tables_copied.len(), 1);
    assert_eq!(sink.recorded.started_tables(), vec!["observation"]);
    assert_eq!(sink.recorded.kinds().last(), Some(&"job-complete"));

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    assert_eq!(status.status, JobState::Canceled);
    assert!(status.end_time.is_some());

    let tracked = tracker.job_by_name("cache-acme").unwrap();
    assert_eq!(
        tracked.statuses,
        vec![TrackerStatus::Started, TrackerStatus::Stopped]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn tracker_receives_redacted_parameters_and_final_status() {
    let dirs = setup();
    let tracker = MemoryJobTracker::new();
    let engine = spawn_engine()
        .await
        .with_tracker(Arc::new(tracker.clone()));
    let config = test_config("acme", &dirs.source, &dirs.cache_dir);

    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");

    let tracked = tracker.job_by_name("cache-acme").unwrap();
    assert_eq!(
        tracked.statuses,
        vec![TrackerStatus::Started, TrackerStatus::Completed]
    );
    assert_eq!(tracked.params["database_code"], "acme");
    assert_eq!(tracked.params["schema_name"], "main");

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    assert_eq!(status.external_job_id.as_deref(), Some(tracked.id.as_str()));
    let listed = engine.list_jobs(None).await.unwrap();
    assert_eq!(listed[0].external_job_id, status.external_job_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn jobs_without_a_tracker_have_no_external_id() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let config = test_config("acme", &dirs.source, &dirs.cache_dir);

    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    assert!(status.external_job_id.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn jobs_are_listed_and_only_running_jobs_can_be_canceled() {
    let dirs = setup();
    let engine = spawn_engine().await;

    let result = engine
        .create_cache(&test_config("acme", &dirs.source, &dirs.cache_dir), None)
        .await
        .unwrap();
    assert!(result.success, "{result:?}");

    let missing = dirs.cache_dir.join("missing.duckdb");
    let result = engine
        .create_cache(&test_config("globex", &missing, &dirs.cache_dir), None)
        .await
        .unwrap();
    assert!(!result.success);

    let jobs = engine.list_jobs(None).await.unwrap();
    let codes: Vec<&str> = jobs.iter().map(|job| job.database_code.as_str()).collect();
    assert_eq!(codes, vec!["globex", "acme"]);

    let errored = engine.list_jobs(Some(JobState::Error)).await.unwrap();
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0].database_code, "globex");

    let err = engine.cancel_job("acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let err = engine.cancel_job("initech").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JobNotFound);
    assert!(engine.get_job_status("initech").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn job_status_never_stores_the_source_password() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let mut config = test_config("acme", &dirs.source, &dirs.cache_dir);
    config.credentials = SourceCredentials::jdbc(
        Dialect::DuckDb,
        dirs.source.display().to_string(),
        Some("reader".to_string()),
        Some("hunter2".to_string().into()),
    );

    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    let stored = serde_json::to_string(&status).unwrap();
    assert!(!stored.contains("hunter2"));
}
