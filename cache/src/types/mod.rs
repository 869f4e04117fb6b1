//! Common types used throughout the cache engine.
//!
//! Destination column types, column metadata produced from source cursors, and the per-table and
//! per-job result records returned to callers.

mod column;
mod dest;
pub mod mapping;
mod result;

pub use crate::conversions::{Cell, RawValue, TableRow};
pub use column::{ColumnInfo, SourceColumn, TableRef};
pub use dest::DestType;
pub use mapping::{TypeMapping, TypeMappingOverrides, map_wire_type};
pub use result::{CacheResult, CopyPhase, TableCopyError, TableCopyResult};
