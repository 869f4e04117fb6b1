//! Cursor based source databases.
//!
//! A [`SourceDriver`] opens [`SourceConnection`]s for one dialect. Connections list tables and
//! columns and open forward only [`SourceCursor`]s over a [`SourceQuery`]. Values come back as
//! [`RawValue`]s and are converted to destination cells by the copy engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cache_config::shared::{Dialect, SourceCredentials};

use crate::bail;
use crate::conversions::RawValue;
use crate::error::{EngineResult, ErrorKind};
use crate::types::SourceColumn;

pub mod duckdb;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod pool;
mod query;

pub use pool::{ConnectionPool, PooledConnection};
pub use query::SourceQuery;

#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Dialect this driver serves.
    fn dialect(&self) -> Dialect;

    /// Opens a connection, read only when `read_only` is set and the driver supports it.
    async fn connect(
        &self,
        credentials: &SourceCredentials,
        read_only: bool,
        timeout: Duration,
    ) -> EngineResult<Box<dyn SourceConnection>>;
}

#[async_trait]
pub trait SourceConnection: Send {
    /// Base tables of `schema`, in discovery order.
    async fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<String>>;

    /// Columns of a table in ordinal order. Empty when the table does not exist.
    async fn list_columns(&mut self, schema: &str, table: &str) -> EngineResult<Vec<SourceColumn>>;

    /// Row count estimate from the source catalog, if it keeps one.
    async fn estimate_rows(&mut self, schema: &str, table: &str) -> EngineResult<Option<u64>>;

    /// Opens a forward only cursor fetching `fetch_size` rows per round trip.
    async fn open_cursor(
        &mut self,
        query: &SourceQuery,
        fetch_size: usize,
    ) -> EngineResult<Box<dyn SourceCursor>>;

    async fn is_valid(&mut self) -> bool;

    async fn close(&mut self) -> EngineResult<()>;
}

#[async_trait]
pub trait SourceCursor: Send {
    /// Columns of the rows returned by [`SourceCursor::next_row`].
    fn columns(&self) -> &[SourceColumn];

    /// Next row, [`None`] once the cursor is exhausted.
    async fn next_row(&mut self) -> EngineResult<Option<Vec<RawValue>>>;
}

/// Registry of the drivers available to the engine, one per dialect.
#[derive(Clone, Default)]
pub struct SourceDrivers {
    drivers: HashMap<Dialect, Arc<dyn SourceDriver>>,
}

impl SourceDrivers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in drivers.
    pub fn with_defaults() -> Self {
        let mut drivers = Self::new();
        drivers.register(Arc::new(duckdb::DuckDbDriver));

        #[cfg(feature = "mysql")]
        {
            drivers.register(Arc::new(mysql::MySqlDriver::new(Dialect::MySql)));
            drivers.register(Arc::new(mysql::MySqlDriver::new(Dialect::MariaDb)));
        }

        drivers
    }

    /// Registers `driver` for its dialect, returning the driver it replaces.
    pub fn register(&mut self, driver: Arc<dyn SourceDriver>) -> Option<Arc<dyn SourceDriver>> {
        self.drivers.insert(driver.dialect(), driver)
    }

    pub fn get(&self, dialect: Dialect) -> EngineResult<Arc<dyn SourceDriver>> {
        match self.drivers.get(&dialect) {
            Some(driver) => Ok(driver.clone()),
            None => bail!(
                ErrorKind::SourceConnectionFailed,
                "No source driver registered for dialect",
                dialect
            ),
        }
    }
}

impl fmt::Debug for SourceDrivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dialects: Vec<&str> = self.drivers.keys().map(|d| d.as_str()).collect();
        dialects.sort_unstable();

        f.debug_struct("SourceDrivers")
            .field("dialects", &dialects)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_the_embedded_driver() {
        let drivers = SourceDrivers::with_defaults();
        assert!(drivers.get(Dialect::DuckDb).is_ok());

        let err = drivers.get(Dialect::Oracle).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
        assert_eq!(err.detail(), Some("oracle"));
    }

    #[test]
    fn register_replaces_existing_driver() {
        let mut drivers = SourceDrivers::new();
        assert!(drivers.register(Arc::new(duckdb::DuckDbDriver)).is_none());
        assert!(drivers.register(Arc::new(duckdb::DuckDbDriver)).is_some());
    }
}
