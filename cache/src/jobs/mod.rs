//! Durable job status and the optional external job tracker.

mod status;
mod store;
mod tracker;

pub use status::{JobProgress, JobState, JobStatus, JobStatusSummary};
pub use store::{JOBS_TABLE, JobStatusStore};
pub use tracker::{JobTracker, MemoryJobTracker, NoopJobTracker, TrackedJob, TrackerStatus};
