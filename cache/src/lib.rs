//! Replicates tables of heterogeneous source databases into a local analytical cache.
//!
//! The [`engine::CacheEngine`] drives a cache job: it attaches the cache file to the
//! [`store::AnalyticalStore`], copies every selected table from the source either through the
//! store's native scanner or through a pooled [`source::SourceConnection`] cursor, builds the
//! full-text indexes and records the job lifecycle in the job status table.

pub mod conversions;
pub mod copy;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod jobs;
mod macros;
pub mod progress;
pub mod retry;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

pub use engine::CacheEngine;
pub use error::{EngineError, EngineResult, ErrorKind};
