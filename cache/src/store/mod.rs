//! The analytical store the cache is written to.

mod appender;
mod base;
pub mod duckdb;

pub use appender::TableAppender;
pub use base::{AnalyticalStore, AttachOptions};
pub use duckdb::DuckDbStore;
