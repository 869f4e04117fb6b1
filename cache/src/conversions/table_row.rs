use crate::bail;
use crate::conversions::Cell;
use crate::error::{EngineResult, ErrorKind};

/// A row of typed cells in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> EngineResult<&Cell> {
        match self.values.get(index) {
            Some(cell) => Ok(cell),
            None => bail!(
                ErrorKind::InvalidData,
                "Row has fewer columns than expected",
                format!("column {index} requested from a row of {} columns", self.values.len())
            ),
        }
    }

    /// Reads a text column, [`None`] for nulls.
    pub fn get_string(&self, index: usize) -> EngineResult<Option<String>> {
        match self.get(index)? {
            Cell::Null => Ok(None),
            Cell::String(value) => Ok(Some(value.clone())),
            other => bail!(
                ErrorKind::InvalidData,
                "Column is not a text column",
                format!("column {index} holds {other:?}")
            ),
        }
    }

    /// Reads an integer column of any width, [`None`] for nulls.
    pub fn get_i64(&self, index: usize) -> EngineResult<Option<i64>> {
        let cell = self.get(index)?;
        if cell.is_null() {
            return Ok(None);
        }

        match cell.as_i64() {
            Some(value) => Ok(Some(value)),
            None => bail!(
                ErrorKind::InvalidData,
                "Column is not an integer column",
                format!("column {index} holds {cell:?}")
            ),
        }
    }
}
