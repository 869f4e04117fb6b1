//! Source driver reading an embedded DuckDB database file.
//!
//! Used for self referential copies and tests. Connections are never pooled and not opened read
//! only, the file is opened in place.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cache_config::shared::{Dialect, SourceCredentials};
use duckdb::types::Value;
use duckdb::{Connection, params_from_iter};
use tokio::sync::mpsc;
use tracing::debug;

use crate::conversions::RawValue;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::source::{SourceConnection, SourceCursor, SourceDriver, SourceQuery};
use crate::store::duckdb::cell_to_value;
use crate::types::SourceColumn;
use crate::types::mapping::wire;
use crate::{bail, engine_error};

const MEMORY_LOCATION: &str = ":memory:";

/// Prefixes accepted in front of the database path.
const LOCATION_PREFIXES: [&str; 2] = ["jdbc:duckdb:", "duckdb:"];

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDriver;

#[async_trait]
impl SourceDriver for DuckDbDriver {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn connect(
        &self,
        credentials: &SourceCredentials,
        _read_only: bool,
        _timeout: Duration,
    ) -> EngineResult<Box<dyn SourceConnection>> {
        let location = database_location(credentials.connection_string().unwrap_or_default());
        if location.is_empty() {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Source database location is empty"
            );
        }

        if location != MEMORY_LOCATION && !Path::new(&location).exists() {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Source database file does not exist",
                location
            );
        }

        debug!(location, "opening embedded source database");
        let conn = tokio::task::spawn_blocking(move || {
            if location == MEMORY_LOCATION {
                Connection::open_in_memory()
            } else {
                Connection::open(&location)
            }
        })
        .await?
        .map_err(|err| {
            engine_error!(
                ErrorKind::SourceConnectionFailed,
                "Source database could not be opened",
                err.to_string()
            )
        })?;

        Ok(Box::new(DuckDbSourceConnection {
            conn: Arc::new(Mutex::new(conn)),
            closed: false,
        }))
    }
}

fn database_location(connection_string: &str) -> String {
    let location = connection_string.trim();
    LOCATION_PREFIXES
        .iter()
        .find_map(|prefix| location.strip_prefix(prefix))
        .unwrap_or(location)
        .to_owned()
}

struct DuckDbSourceConnection {
    conn: Arc<Mutex<Connection>>,
    closed: bool,
}

impl DuckDbSourceConnection {
    async fn run<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> Result<T, duckdb::Error> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed {
            bail!(ErrorKind::ResourceClosed, "Source connection is closed");
        }

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            f(&conn).map_err(source_error)
        })
        .await?
    }
}

#[async_trait]
impl SourceConnection for DuckDbSourceConnection {
    async fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<String>> {
        let schema = schema.to_owned();
        self.run(move |conn| {
            let mut statement = conn.prepare(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_catalog = current_database() AND table_schema = ? \
                 AND table_type = 'BASE TABLE' ORDER BY table_name",
            )?;
            let tables = statement
                .query_map([schema], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tables)
        })
        .await
    }

    async fn list_columns(&mut self, schema: &str, table: &str) -> EngineResult<Vec<SourceColumn>> {
        let schema = schema.to_owned();
        let table = table.to_owned();
        self.run(move |conn| {
            let mut statement = conn.prepare(
                "SELECT column_name, data_type, numeric_precision, numeric_scale, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_catalog = current_database() AND table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
            )?;
            let columns = statement
                .query_map([schema, table], |row| {
                    let name: String = row.get(0)?;
                    let data_type: String = row.get(1)?;
                    let precision: Option<i32> = row.get(2)?;
                    let scale: Option<i32> = row.get(3)?;
                    let nullable: String = row.get(4)?;
                    Ok(source_column(name, &data_type, precision, scale, nullable == "YES"))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }

    async fn estimate_rows(&mut self, schema: &str, table: &str) -> EngineResult<Option<u64>> {
        let schema = schema.to_owned();
        let table = table.to_owned();
        self.run(move |conn| {
            let mut statement = conn.prepare(
                "SELECT estimated_size FROM duckdb_tables() \
                 WHERE database_name = current_database() AND schema_name = ? AND table_name = ?",
            )?;
            let mut rows = statement.query([schema, table])?;
            match rows.next()? {
                Some(row) => Ok(row
                    .get::<_, Option<i64>>(0)?
                    .and_then(|size| u64::try_from(size).ok())),
                None => Ok(None),
            }
        })
        .await
    }

    async fn open_cursor(
        &mut self,
        query: &SourceQuery,
        fetch_size: usize,
    ) -> EngineResult<Box<dyn SourceCursor>> {
        if self.closed {
            bail!(ErrorKind::ResourceClosed, "Source connection is closed");
        }

        let sql = query.to_sql_with(
            |column, quoted| match column.wire_type {
                wire::BLOB | wire::BINARY | wire::VARBINARY | wire::LONGVARBINARY => {
                    format!("hex({quoted})")
                }
                _ => format!("CAST({quoted} AS VARCHAR)"),
            },
            "TIMESTAMP",
        )?;
        let params: Vec<Value> = query.params().into_iter().map(cell_to_value).collect();
        let columns = query.columns().to_vec();
        let width = columns.len();

        debug!(sql, fetch_size, "opening embedded source cursor");

        let (tx, rx) = mpsc::channel(fetch_size.max(1));
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let streamed = (|| -> EngineResult<()> {
                let conn = lock(&conn)?;
                let mut statement = conn.prepare(&sql).map_err(source_error)?;
                let mut rows = statement
                    .query(params_from_iter(params))
                    .map_err(source_error)?;

                while let Some(row) = rows.next().map_err(source_error)? {
                    let mut values = Vec::with_capacity(width);
                    for index in 0..width {
                        let value: Option<String> = row.get(index).map_err(source_error)?;
                        values.push(value.map(RawValue::Text).unwrap_or(RawValue::Null));
                    }

                    // The cursor was dropped.
                    if tx.blocking_send(Ok(values)).is_err() {
                        return Ok(());
                    }
                }

                Ok(())
            })();

            if let Err(err) = streamed {
                let _ = tx.blocking_send(Err(err));
            }
        });

        Ok(Box::new(ChannelCursor { columns, rows: rx }))
    }

    async fn is_valid(&mut self) -> bool {
        !self.closed && self.run(|conn| conn.execute_batch("SELECT 1")).await.is_ok()
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.closed = true;

        Ok(())
    }
}

/// Cursor fed by a producer streaming rows into a bounded channel.
pub(crate) struct ChannelCursor {
    pub(crate) columns: Vec<SourceColumn>,
    pub(crate) rows: mpsc::Receiver<EngineResult<Vec<RawValue>>>,
}

#[async_trait]
impl SourceCursor for ChannelCursor {
    fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    async fn next_row(&mut self) -> EngineResult<Option<Vec<RawValue>>> {
        self.rows.recv().await.transpose()
    }
}

fn lock(conn: &Mutex<Connection>) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| engine_error!(ErrorKind::InvalidState, "Source connection is poisoned"))
}

fn source_error(err: duckdb::Error) -> EngineError {
    let message = err.to_string();

    engine_error!(ErrorKind::SourceQueryFailed, "Source query failed", message)
        .classify_driver_message(&message)
}

fn source_column(
    name: String,
    data_type: &str,
    precision: Option<i32>,
    scale: Option<i32>,
    nullable: bool,
) -> SourceColumn {
    let upper = data_type.trim().to_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();

    let (wire_type, fixed_precision) = match base {
        "BOOLEAN" | "BOOL" => (wire::BOOLEAN, None),
        "TINYINT" => (wire::TINYINT, None),
        "SMALLINT" | "UTINYINT" => (wire::SMALLINT, None),
        "INTEGER" | "USMALLINT" => (wire::INTEGER, None),
        "BIGINT" | "UINTEGER" => (wire::BIGINT, None),
        "UBIGINT" | "HUGEINT" | "UHUGEINT" => (wire::NUMERIC, Some((38, 0))),
        "FLOAT" | "REAL" => (wire::REAL, None),
        "DOUBLE" => (wire::DOUBLE, None),
        "DECIMAL" | "NUMERIC" => (wire::DECIMAL, None),
        "VARCHAR" | "TEXT" | "UUID" | "JSON" => (wire::VARCHAR, None),
        "DATE" => (wire::DATE, None),
        "TIME" => (wire::TIME, None),
        "TIME WITH TIME ZONE" | "TIMETZ" => (wire::TIME_WITH_TIMEZONE, None),
        "TIMESTAMP" | "DATETIME" | "TIMESTAMP_S" | "TIMESTAMP_MS" | "TIMESTAMP_NS" => {
            (wire::TIMESTAMP, None)
        }
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => (wire::TIMESTAMP_WITH_TIMEZONE, None),
        "BLOB" | "BYTEA" => (wire::BLOB, None),
        _ => (wire::OTHER, None),
    };

    let (precision, scale) = fixed_precision.unwrap_or((
        precision.and_then(|p| u32::try_from(p).ok()).unwrap_or(0),
        scale.and_then(|s| u32::try_from(s).ok()).unwrap_or(0),
    ));

    SourceColumn {
        name,
        wire_type,
        precision,
        scale,
        nullable,
    }
}
