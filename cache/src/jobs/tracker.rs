//! Best-effort mirror of job lifecycles into an external tracking system.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineResult;

/// Status reported to an external tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    Started,
    Completed,
    Failed,
    Stopped,
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            TrackerStatus::Started => "STARTED",
            TrackerStatus::Completed => "COMPLETED",
            TrackerStatus::Failed => "FAILED",
            TrackerStatus::Stopped => "STOPPED",
        };

        f.write_str(status)
    }
}

/// External job tracking store.
///
/// Failures are logged by the engine and never fail a cache job.
#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Registers a job and returns the tracker's id for it.
    async fn write_job(&self, name: &str, params: &serde_json::Value) -> EngineResult<String>;

    async fn update_job_status(&self, job_id: &str, status: TrackerStatus) -> EngineResult<()>;
}

/// Tracker used when no external system is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopJobTracker;

#[async_trait]
impl JobTracker for NoopJobTracker {
    async fn write_job(&self, _name: &str, _params: &serde_json::Value) -> EngineResult<String> {
        Ok(String::new())
    }

    async fn update_job_status(&self, _job_id: &str, _status: TrackerStatus) -> EngineResult<()> {
        Ok(())
    }
}

/// A job registered with a [`MemoryJobTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    pub id: String,
    pub name: String,
    pub params: serde_json::Value,
    /// Every status reported for the job, oldest first.
    pub statuses: Vec<TrackerStatus>,
}

/// Tracker keeping jobs in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobTracker {
    jobs: Arc<Mutex<HashMap<String, TrackedJob>>>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<TrackedJob> {
        self.jobs
            .lock()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn job_by_name(&self, name: &str) -> Option<TrackedJob> {
        self.jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.values().find(|job| job.name == name).cloned())
    }
}

#[async_trait]
impl JobTracker for MemoryJobTracker {
    async fn write_job(&self, name: &str, params: &serde_json::Value) -> EngineResult<String> {
        let job_id = Uuid::new_v4().to_string();
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(
                job_id.clone(),
                TrackedJob {
                    id: job_id.clone(),
                    name: name.to_owned(),
                    params: params.clone(),
                    statuses: vec![TrackerStatus::Started],
                },
            );
        }

        Ok(job_id)
    }

    async fn update_job_status(&self, job_id: &str, status: TrackerStatus) -> EngineResult<()> {
        if let Ok(mut jobs) = self.jobs.lock()
            && let Some(job) = jobs.get_mut(job_id)
        {
            job.statuses.push(status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_tracker_records_status_history() {
        let tracker = MemoryJobTracker::new();
        let job_id = tracker
            .write_job("cache-acme", &serde_json::json!({"schema_name": "public"}))
            .await
            .unwrap();
        tracker
            .update_job_status(&job_id, TrackerStatus::Completed)
            .await
            .unwrap();

        let job = tracker.job_by_name("cache-acme").unwrap();
        assert_eq!(
            job.statuses,
            vec![TrackerStatus::Started, TrackerStatus::Completed]
        );
        assert_eq!(job.params["schema_name"], "public");
    }

    #[tokio::test]
    async fn noop_tracker_accepts_everything() {
        let job_id = NoopJobTracker
            .write_job("cache-acme", &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(NoopJobTracker
            .update_job_status(&job_id, TrackerStatus::Stopped)
            .await
            .is_ok());
    }
}
