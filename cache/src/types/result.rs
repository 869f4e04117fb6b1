use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a successful table copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyResult {
    pub table: String,
    /// Exact number of rows written.
    pub rows_copied: u64,
    pub duration_ms: u64,
}

/// Stage of a table copy that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyPhase {
    Copy,
    Index,
    Fts,
    Data,
}

impl fmt::Display for CopyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            CopyPhase::Copy => "copy",
            CopyPhase::Index => "index",
            CopyPhase::Fts => "fts",
            CopyPhase::Data => "data",
        };

        f.write_str(phase)
    }
}

/// Outcome of a failed table copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyError {
    pub table: String,
    pub error: String,
    pub phase: CopyPhase,
    /// Whether a retry of the copy may succeed. Not persisted.
    #[serde(skip)]
    pub transient: bool,
}

impl fmt::Display for TableCopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "copy of table `{}` failed during {}: {}",
            self.table, self.phase, self.error
        )
    }
}

impl std::error::Error for TableCopyError {}

/// Aggregate outcome of a cache creation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheResult {
    /// `true` iff no table failed and the job did not abort.
    pub success: bool,
    pub database_code: String,
    pub schema_name: String,
    pub tables_copied: Vec<TableCopyResult>,
    pub tables_failed: Vec<TableCopyError>,
    pub fts_tables: Vec<String>,
    pub duration_ms: u64,
    /// Set when the whole job aborted.
    pub error: Option<String>,
    /// Set when the job stopped because of a cancel request.
    #[serde(default)]
    pub canceled: bool,
}

impl CacheResult {
    /// Result of a job that aborted before or during table iteration.
    pub fn fatal(
        database_code: impl Into<String>,
        schema_name: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            database_code: database_code.into(),
            schema_name: schema_name.into(),
            tables_copied: Vec::new(),
            tables_failed: Vec::new(),
            fts_tables: Vec::new(),
            duration_ms,
            error: Some(error.into()),
            canceled: false,
        }
    }

    /// Total rows copied across all tables.
    pub fn total_rows(&self) -> u64 {
        self.tables_copied.iter().map(|table| table.rows_copied).sum()
    }
}
