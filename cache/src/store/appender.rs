use std::mem;

use crate::bail;
use crate::conversions::{Cell, TableRow};
use crate::error::{EngineResult, ErrorKind};
use crate::store::AnalyticalStore;
use crate::types::TableRef;

/// Row oriented writer buffering rows for a columnar bulk append.
///
/// Rows are built cell by cell between [`TableAppender::begin_row`] and
/// [`TableAppender::end_row`]. Only complete rows are ever handed to the store, a row still being
/// built is kept across flushes.
#[derive(Debug)]
pub struct TableAppender<'a, S> {
    store: &'a S,
    table: TableRef,
    buffered: Vec<TableRow>,
    current: Option<Vec<Cell>>,
    rows_flushed: u64,
    closed: bool,
}

impl<'a, S> TableAppender<'a, S>
where
    S: AnalyticalStore,
{
    pub fn new(store: &'a S, table: TableRef) -> Self {
        Self {
            store,
            table,
            buffered: Vec::new(),
            current: None,
            rows_flushed: 0,
            closed: false,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn begin_row(&mut self) -> EngineResult<()> {
        self.ensure_open()?;

        if self.current.is_some() {
            bail!(
                ErrorKind::InvalidState,
                "Appender row already started",
                format!("table {}", self.table)
            );
        }

        self.current = Some(Vec::new());

        Ok(())
    }

    pub fn append(&mut self, cell: Cell) -> EngineResult<()> {
        self.ensure_open()?;

        match self.current.as_mut() {
            Some(row) => {
                row.push(cell);
                Ok(())
            }
            None => bail!(
                ErrorKind::InvalidState,
                "Appender row not started",
                format!("table {}", self.table)
            ),
        }
    }

    pub fn end_row(&mut self) -> EngineResult<()> {
        self.ensure_open()?;

        match self.current.take() {
            Some(values) => {
                self.buffered.push(TableRow::new(values));
                Ok(())
            }
            None => bail!(
                ErrorKind::InvalidState,
                "Appender row not started",
                format!("table {}", self.table)
            ),
        }
    }

    /// Appends a complete row.
    pub fn append_row(&mut self, row: TableRow) -> EngineResult<()> {
        self.ensure_open()?;
        self.buffered.push(row);

        Ok(())
    }

    /// Number of complete rows waiting for the next flush.
    pub fn pending_rows(&self) -> usize {
        self.buffered.len()
    }

    /// Number of rows written to the store so far.
    pub fn rows_flushed(&self) -> u64 {
        self.rows_flushed
    }

    /// Writes every complete row buffered so far.
    pub async fn flush(&mut self) -> EngineResult<()> {
        self.ensure_open()?;

        if self.buffered.is_empty() {
            return Ok(());
        }

        let rows = mem::take(&mut self.buffered);
        let count = rows.len() as u64;
        self.store.append_rows(&self.table, rows).await?;
        self.rows_flushed += count;

        Ok(())
    }

    /// Flushes remaining rows and closes the appender.
    ///
    /// A row that was begun but not ended is discarded.
    pub async fn close(&mut self) -> EngineResult<()> {
        self.flush().await?;
        self.current = None;
        self.closed = true;

        Ok(())
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            bail!(
                ErrorKind::ResourceClosed,
                "Appender is closed",
                format!("table {}", self.table)
            );
        }

        Ok(())
    }
}
