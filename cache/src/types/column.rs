use std::fmt;

use crate::types::DestType;

/// Column metadata reported by a source driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// `java.sql.Types` code of the column.
    pub wire_type: i32,
    pub precision: u32,
    pub scale: u32,
    pub nullable: bool,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, wire_type: i32) -> Self {
        Self {
            name: name.into(),
            wire_type,
            precision: 0,
            scale: 0,
            nullable: true,
        }
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A source column together with the destination type it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub wire_type: i32,
    pub dest_type: DestType,
    pub precision: u32,
    pub scale: u32,
    pub nullable: bool,
}

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}
