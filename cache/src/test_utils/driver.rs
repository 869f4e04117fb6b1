use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cache_config::shared::{Dialect, SourceCredentials};

use crate::conversions::RawValue;
use crate::engine_error;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::source::duckdb::DuckDbDriver;
use crate::source::{SourceConnection, SourceCursor, SourceDriver, SourceQuery};
use crate::types::SourceColumn;

/// Failure injected into the cursor of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The cursor fails after yielding `after_rows` rows.
    FailAfterRows { after_rows: usize, transient: bool },
    /// Opening the cursor panics.
    Panic,
}

impl Fault {
    pub fn transient() -> Self {
        Fault::FailAfterRows {
            after_rows: 0,
            transient: true,
        }
    }

    pub fn permanent_after(after_rows: usize) -> Self {
        Fault::FailAfterRows {
            after_rows,
            transient: false,
        }
    }

    fn error(transient: bool) -> EngineError {
        if transient {
            engine_error!(
                ErrorKind::SourceConnectionFailed,
                "Injected source failure",
                "connection reset by peer"
            )
        } else {
            engine_error!(
                ErrorKind::SourceQueryFailed,
                "Injected source failure",
                "permission denied for table"
            )
        }
    }
}

#[derive(Debug, Default)]
struct FaultState {
    /// Fault and the number of cursor opens it still applies to, per table.
    faults: HashMap<String, (Fault, usize)>,
    opened: HashMap<String, usize>,
}

/// Embedded source driver failing the cursors of chosen tables.
#[derive(Debug, Clone, Default)]
pub struct FaultyDriver {
    inner: DuckDbDriver,
    state: Arc<Mutex<FaultState>>,
}

impl FaultyDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects `fault` into the next `times` cursors opened over `table`.
    pub fn fail_table(self, table: &str, fault: Fault, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(table.to_owned(), (fault, times));
        self
    }

    /// Number of cursors opened over `table` so far.
    pub fn cursors_opened(&self, table: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .opened
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    fn next_fault(&self, table: &str) -> Option<Fault> {
        let mut state = self.state.lock().unwrap();
        *state.opened.entry(table.to_owned()).or_default() += 1;

        let (fault, remaining) = state.faults.get_mut(table)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;

        Some(*fault)
    }
}

#[async_trait]
impl SourceDriver for FaultyDriver {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn connect(
        &self,
        credentials: &SourceCredentials,
        read_only: bool,
        timeout: Duration,
    ) -> EngineResult<Box<dyn SourceConnection>> {
        let inner = self.inner.connect(credentials, read_only, timeout).await?;

        Ok(Box::new(FaultyConnection {
            inner,
            driver: self.clone(),
        }))
    }
}

struct FaultyConnection {
    inner: Box<dyn SourceConnection>,
    driver: FaultyDriver,
}

#[async_trait]
impl SourceConnection for FaultyConnection {
    async fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<String>> {
        self.inner.list_tables(schema).await
    }

    async fn list_columns(&mut self, schema: &str, table: &str) -> EngineResult<Vec<SourceColumn>> {
        self.inner.list_columns(schema, table).await
    }

    async fn estimate_rows(&mut self, schema: &str, table: &str) -> EngineResult<Option<u64>> {
        self.inner.estimate_rows(schema, table).await
    }

    async fn open_cursor(
        &mut self,
        query: &SourceQuery,
        fetch_size: usize,
    ) -> EngineResult<Box<dyn SourceCursor>> {
        let fault = self.driver.next_fault(query.table());
        if fault == Some(Fault::Panic) {
            panic!("injected panic opening cursor over {}", query.table());
        }

        let inner = self.inner.open_cursor(query, fetch_size).await?;
        match fault {
            Some(Fault::FailAfterRows {
                after_rows,
                transient,
            }) => Ok(Box::new(FaultyCursor {
                inner,
                remaining: after_rows,
                transient,
            })),
            _ => Ok(inner),
        }
    }

    async fn is_valid(&mut self) -> bool {
        self.inner.is_valid().await
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.inner.close().await
    }
}

struct FaultyCursor {
    inner: Box<dyn SourceCursor>,
    remaining: usize,
    transient: bool,
}

#[async_trait]
impl SourceCursor for FaultyCursor {
    fn columns(&self) -> &[SourceColumn] {
        self.inner.columns()
    }

    async fn next_row(&mut self) -> EngineResult<Option<Vec<RawValue>>> {
        if self.remaining == 0 {
            return Err(Fault::error(self.transient));
        }
        self.remaining -= 1;

        self.inner.next_row().await
    }
}
