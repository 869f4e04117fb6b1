//! Shared helpers for engine tests.
//!
//! Provides a seeded embedded source database, a recording progress sink and a source driver
//! injecting failures into chosen tables.

pub mod database;
pub mod driver;
pub mod sink;

pub use crate::jobs::MemoryJobTracker;
