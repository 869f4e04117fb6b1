use std::future::Future;
use std::path::Path;

use crate::conversions::{Cell, TableRow};
use crate::error::EngineResult;
use crate::store::TableAppender;
use crate::types::TableRef;

/// Options of an `ATTACH` statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Storage extension handling the attached database, e.g. `postgres`.
    pub db_type: Option<String>,
    pub read_only: bool,
}

impl AttachOptions {
    pub fn read_only(db_type: impl Into<String>) -> Self {
        Self {
            db_type: Some(db_type.into()),
            read_only: true,
        }
    }
}

/// Embedded analytical database receiving the cached tables.
///
/// A handle is one session: transactions opened with [`AnalyticalStore::begin`] cover every
/// statement issued through the same handle until commit or rollback. Work that must not join
/// that transaction runs on a session obtained from [`AnalyticalStore::fork_session`].
pub trait AnalyticalStore: Send + Sync + Sized {
    /// Executes a statement and returns the number of changed rows.
    fn execute(&self, sql: &str) -> impl Future<Output = EngineResult<u64>> + Send;

    /// Executes a statement with `?` parameters and returns the number of changed rows.
    fn execute_params(
        &self,
        sql: &str,
        params: &[Cell],
    ) -> impl Future<Output = EngineResult<u64>> + Send;

    fn query(&self, sql: &str) -> impl Future<Output = EngineResult<Vec<TableRow>>> + Send;

    fn query_params(
        &self,
        sql: &str,
        params: &[Cell],
    ) -> impl Future<Output = EngineResult<Vec<TableRow>>> + Send;

    /// Attaches the database at `path` under `alias`.
    fn attach(
        &self,
        path: &str,
        alias: &str,
        options: &AttachOptions,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    fn detach(&self, alias: &str) -> impl Future<Output = EngineResult<()>> + Send;

    fn begin(&self) -> impl Future<Output = EngineResult<()>> + Send;

    fn commit(&self) -> impl Future<Output = EngineResult<()>> + Send;

    fn rollback(&self) -> impl Future<Output = EngineResult<()>> + Send;

    /// Bulk appends complete rows to a table through the columnar appender.
    fn append_rows(
        &self,
        table: &TableRef,
        rows: Vec<TableRow>,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Number of rows changed by the last statement executed on this handle.
    fn changes(&self) -> u64;

    /// Installs and loads an extension, once per handle.
    fn load_extension(&self, name: &str) -> impl Future<Output = EngineResult<()>> + Send;

    /// Opens another session on the same database.
    fn fork_session(&self) -> impl Future<Output = EngineResult<Self>> + Send;

    /// Closes the handle. Later operations fail with [`crate::error::ErrorKind::ResourceClosed`].
    fn close(&self) -> impl Future<Output = EngineResult<()>> + Send;

    /// Creates a row appender bound to `table`.
    fn create_appender(&self, table: TableRef) -> TableAppender<'_, Self> {
        TableAppender::new(self, table)
    }

    /// Attaches a database file, creating its parent directory first.
    fn attach_file(
        &self,
        path: &Path,
        alias: &str,
    ) -> impl Future<Output = EngineResult<()>> + Send {
        async move {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }

            self.attach(&path.to_string_lossy(), alias, &AttachOptions::default())
                .await
        }
    }
}
