//! Mapping of source wire types to destination column types.
//!
//! Source drivers report column types as `java.sql.Types` codes, the lingua franca of cursor
//! based database drivers. The mapping is a plain table that can be extended or overridden from
//! JSON without touching the conversion logic.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineResult;
use crate::types::{ColumnInfo, DestType, SourceColumn};

/// `java.sql.Types` codes, plus vendor codes seen from SQL Server and Oracle drivers.
pub mod wire {
    pub const BIT: i32 = -7;
    pub const TINYINT: i32 = -6;
    pub const SMALLINT: i32 = 5;
    pub const INTEGER: i32 = 4;
    pub const BIGINT: i32 = -5;
    pub const FLOAT: i32 = 6;
    pub const REAL: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const NUMERIC: i32 = 2;
    pub const DECIMAL: i32 = 3;
    pub const CHAR: i32 = 1;
    pub const VARCHAR: i32 = 12;
    pub const LONGVARCHAR: i32 = -1;
    pub const NCHAR: i32 = -15;
    pub const NVARCHAR: i32 = -9;
    pub const LONGNVARCHAR: i32 = -16;
    pub const CLOB: i32 = 2005;
    pub const NCLOB: i32 = 2011;
    pub const DATE: i32 = 91;
    pub const TIME: i32 = 92;
    pub const TIMESTAMP: i32 = 93;
    pub const TIME_WITH_TIMEZONE: i32 = 2013;
    pub const TIMESTAMP_WITH_TIMEZONE: i32 = 2014;
    pub const BINARY: i32 = -2;
    pub const VARBINARY: i32 = -3;
    pub const LONGVARBINARY: i32 = -4;
    pub const BLOB: i32 = 2004;
    pub const BOOLEAN: i32 = 16;
    pub const OTHER: i32 = 1111;

    /// SQL Server `DATETIMEOFFSET`.
    pub const SQLSERVER_DATETIMEOFFSET: i32 = -155;
    /// Oracle `TIMESTAMP WITH TIME ZONE`.
    pub const ORACLE_TIMESTAMPTZ: i32 = -101;
    /// Oracle `TIMESTAMP WITH LOCAL TIME ZONE`.
    pub const ORACLE_TIMESTAMPLTZ: i32 = -102;
    /// Oracle `BINARY_FLOAT`.
    pub const ORACLE_BINARY_FLOAT: i32 = 100;
    /// Oracle `BINARY_DOUBLE`.
    pub const ORACLE_BINARY_DOUBLE: i32 = 101;
}

/// Destination type used for codes missing from the mapping.
const FALLBACK_TYPE: DestType = DestType::Varchar;

static DEFAULT_MAPPING: LazyLock<TypeMapping> = LazyLock::new(TypeMapping::default);

/// Maps a wire type with the built-in table.
///
/// Total: unknown codes map to VARCHAR with a warning.
pub fn map_wire_type(code: i32) -> DestType {
    DEFAULT_MAPPING.map(code)
}

/// Overrides read from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeMappingOverrides {
    /// Wire type code to destination type name, e.g. `{"1111": "VARCHAR"}`.
    #[serde(default)]
    pub mappings: HashMap<i32, DestType>,
    #[serde(default)]
    pub fallback: Option<DestType>,
}

/// Data driven mapping from wire type codes to destination types.
#[derive(Debug, Clone)]
pub struct TypeMapping {
    mappings: HashMap<i32, DestType>,
    fallback: DestType,
}

impl TypeMapping {
    /// Creates an empty mapping sending every code to `fallback`.
    pub fn empty(fallback: DestType) -> Self {
        Self {
            mappings: HashMap::new(),
            fallback,
        }
    }

    /// Reads overrides from JSON and applies them over the built-in table.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let overrides: TypeMappingOverrides = serde_json::from_str(json)?;
        Ok(Self::default().with_overrides(overrides))
    }

    pub fn with_overrides(mut self, overrides: TypeMappingOverrides) -> Self {
        self.mappings.extend(overrides.mappings);
        if let Some(fallback) = overrides.fallback {
            self.fallback = fallback;
        }
        self
    }

    pub fn insert(&mut self, code: i32, dest: DestType) -> Option<DestType> {
        self.mappings.insert(code, dest)
    }

    pub fn contains(&self, code: i32) -> bool {
        self.mappings.contains_key(&code)
    }

    pub fn map(&self, code: i32) -> DestType {
        match self.mappings.get(&code) {
            Some(dest) => *dest,
            None => {
                warn!(
                    wire_type = code,
                    fallback = %self.fallback,
                    "unknown source column type, using fallback type"
                );
                self.fallback
            }
        }
    }

    /// Maps a source column, keeping the source precision and scale for decimals.
    pub fn column_info(&self, column: &SourceColumn) -> ColumnInfo {
        let dest_type = match self.map(column.wire_type) {
            DestType::Decimal { .. } => DestType::decimal(column.precision, column.scale),
            other => other,
        };

        ColumnInfo {
            name: column.name.clone(),
            wire_type: column.wire_type,
            dest_type,
            precision: column.precision,
            scale: column.scale,
            nullable: column.nullable,
        }
    }
}

impl Default for TypeMapping {
    fn default() -> Self {
        use wire::*;

        let decimal = DestType::Decimal {
            precision: 18,
            scale: 3,
        };

        let mappings = [
            (BIT, DestType::Boolean),
            (BOOLEAN, DestType::Boolean),
            (TINYINT, DestType::TinyInt),
            (SMALLINT, DestType::SmallInt),
            (INTEGER, DestType::Integer),
            (BIGINT, DestType::BigInt),
            (FLOAT, DestType::Double),
            (REAL, DestType::Float),
            (DOUBLE, DestType::Double),
            (ORACLE_BINARY_FLOAT, DestType::Float),
            (ORACLE_BINARY_DOUBLE, DestType::Double),
            (NUMERIC, decimal),
            (DECIMAL, decimal),
            (CHAR, DestType::Varchar),
            (VARCHAR, DestType::Varchar),
            (LONGVARCHAR, DestType::Varchar),
            (NCHAR, DestType::Varchar),
            (NVARCHAR, DestType::Varchar),
            (LONGNVARCHAR, DestType::Varchar),
            (CLOB, DestType::Varchar),
            (NCLOB, DestType::Varchar),
            (DATE, DestType::Date),
            (TIME, DestType::Time),
            (TIME_WITH_TIMEZONE, DestType::Time),
            (TIMESTAMP, DestType::Timestamp),
            (TIMESTAMP_WITH_TIMEZONE, DestType::TimestampTz),
            (SQLSERVER_DATETIMEOFFSET, DestType::TimestampTz),
            (ORACLE_TIMESTAMPTZ, DestType::TimestampTz),
            (ORACLE_TIMESTAMPLTZ, DestType::TimestampTz),
            (BINARY, DestType::Blob),
            (VARBINARY, DestType::Blob),
            (LONGVARBINARY, DestType::Blob),
            (BLOB, DestType::Blob),
        ];

        Self {
            mappings: mappings.into_iter().collect(),
            fallback: FALLBACK_TYPE,
        }
    }
}
