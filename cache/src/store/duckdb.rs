//! [`AnalyticalStore`] over an embedded DuckDB database.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike};
use duckdb::types::{TimeUnit, Value};
use duckdb::{Connection, appender_params_from_iter, params_from_iter};
use tracing::debug;

use crate::conversions::{Cell, TableRow};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::identifier::{IdentifierKind, escape, quote, quote_database_code, quote_literal};
use crate::store::{AnalyticalStore, AttachOptions};
use crate::types::TableRef;
use crate::{bail, engine_error};

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Per handle state shared by clones of a [`DuckDbStore`].
#[derive(Debug, Default)]
struct StoreState {
    extensions: Mutex<HashSet<String>>,
    closed: AtomicBool,
    last_changes: AtomicU64,
}

/// A DuckDB session.
///
/// Clones share the session and its transaction. Blocking calls into DuckDB run on the blocking
/// thread pool.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
    state: Arc<StoreState>,
}

impl fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Opens (or creates) the database file at `path`.
    pub async fn open(path: &Path) -> EngineResult<Self> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || Connection::open(path)).await??;

        Ok(Self::from_connection(conn))
    }

    pub async fn open_in_memory() -> EngineResult<Self> {
        let conn = tokio::task::spawn_blocking(Connection::open_in_memory).await??;

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            state: Arc::new(StoreState::default()),
        }
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.state.closed.load(Ordering::Acquire) {
            bail!(ErrorKind::ResourceClosed, "Analytical store is closed");
        }

        Ok(())
    }

    async fn run<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open()?;

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| {
                engine_error!(ErrorKind::InvalidState, "Analytical store session is poisoned")
            })?;
            f(&conn)
        })
        .await?
    }

    async fn execute_batch(&self, sql: &'static str) -> EngineResult<()> {
        self.run(move |conn| conn.execute_batch(sql).map_err(|err| sql_error(err, sql)))
            .await
    }

    fn record_changes(&self, changes: u64) {
        self.state.last_changes.store(changes, Ordering::Release);
    }
}

impl AnalyticalStore for DuckDbStore {
    async fn execute(&self, sql: &str) -> EngineResult<u64> {
        self.execute_params(sql, &[]).await
    }

    async fn execute_params(&self, sql: &str, params: &[Cell]) -> EngineResult<u64> {
        let sql = sql.to_owned();
        let params: Vec<Value> = params.iter().cloned().map(cell_to_value).collect();

        let changes = self
            .run(move |conn| {
                conn.execute(&sql, params_from_iter(params))
                    .map_err(|err| sql_error(err, &sql))
            })
            .await? as u64;
        self.record_changes(changes);

        Ok(changes)
    }

    async fn query(&self, sql: &str) -> EngineResult<Vec<TableRow>> {
        self.query_params(sql, &[]).await
    }

    async fn query_params(&self, sql: &str, params: &[Cell]) -> EngineResult<Vec<TableRow>> {
        let sql = sql.to_owned();
        let params: Vec<Value> = params.iter().cloned().map(cell_to_value).collect();

        self.run(move |conn| read_rows(conn, &sql, params).map_err(|err| sql_context(err, &sql)))
            .await
    }

    async fn attach(&self, path: &str, alias: &str, options: &AttachOptions) -> EngineResult<()> {
        let mut sql = format!(
            "ATTACH {} AS {}",
            quote_literal(path),
            quote_database_code(alias)?
        );

        let mut attach_options = Vec::new();
        if let Some(db_type) = &options.db_type {
            escape(db_type, IdentifierKind::Column)?;
            attach_options.push(format!("TYPE {db_type}"));
        }
        if options.read_only {
            attach_options.push("READ_ONLY".to_string());
        }
        if !attach_options.is_empty() {
            sql.push_str(&format!(" ({})", attach_options.join(", ")));
        }

        debug!(alias, read_only = options.read_only, "attaching database");
        self.execute(&sql).await?;

        Ok(())
    }

    async fn detach(&self, alias: &str) -> EngineResult<()> {
        let sql = format!("DETACH {}", quote_database_code(alias)?);
        debug!(alias, "detaching database");
        self.execute(&sql).await?;

        Ok(())
    }

    async fn begin(&self) -> EngineResult<()> {
        self.execute_batch("BEGIN TRANSACTION").await
    }

    async fn commit(&self) -> EngineResult<()> {
        self.execute_batch("COMMIT").await
    }

    async fn rollback(&self) -> EngineResult<()> {
        self.execute_batch("ROLLBACK").await
    }

    async fn append_rows(&self, table: &TableRef, rows: Vec<TableRow>) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let table = table.clone();
        let count = rows.len() as u64;
        self.run(move |conn| {
            // The appender resolves tables in the default catalog.
            let previous: String =
                conn.query_row("SELECT current_database()", [], |row| row.get(0))?;
            conn.execute_batch(&format!("USE {}", quote_database_code(&table.catalog)?))?;

            let appended = append_to(conn, &table, rows);
            let restored = quote_database_code(&previous)
                .and_then(|catalog| Ok(conn.execute_batch(&format!("USE {catalog}"))?));

            appended.and(restored)
        })
        .await?;
        self.record_changes(count);

        Ok(())
    }

    fn changes(&self) -> u64 {
        self.state.last_changes.load(Ordering::Acquire)
    }

    async fn load_extension(&self, name: &str) -> EngineResult<()> {
        escape(name, IdentifierKind::Column)?;

        let loaded = self
            .state
            .extensions
            .lock()
            .map(|extensions| extensions.contains(name))
            .unwrap_or(false);
        if loaded {
            return Ok(());
        }

        let sql = format!("INSTALL {name}; LOAD {name};");
        self.run(move |conn| {
            conn.execute_batch(&sql).map_err(|err| {
                engine_error!(
                    ErrorKind::ExtensionError,
                    "Extension could not be loaded",
                    format!("{err} (sql: {sql})")
                )
            })
        })
        .await?;

        if let Ok(mut extensions) = self.state.extensions.lock() {
            extensions.insert(name.to_owned());
        }
        debug!(extension = name, "extension loaded");

        Ok(())
    }

    async fn fork_session(&self) -> EngineResult<Self> {
        let conn = self.run(|conn| Ok(conn.try_clone()?)).await?;

        Ok(Self::from_connection(conn))
    }

    async fn close(&self) -> EngineResult<()> {
        self.state.closed.store(true, Ordering::Release);

        Ok(())
    }
}

fn append_to(conn: &Connection, table: &TableRef, rows: Vec<TableRow>) -> EngineResult<()> {
    // Validates the names, the appender takes them unquoted.
    quote(&table.schema)?;
    quote(&table.table)?;

    let mut appender = conn.appender_to_db(&table.table, &table.schema)?;
    for row in rows {
        let values = row.values.into_iter().map(cell_to_value);
        appender.append_row(appender_params_from_iter(values))?;
    }
    appender.flush()?;

    Ok(())
}

fn read_rows(conn: &Connection, sql: &str, params: Vec<Value>) -> EngineResult<Vec<TableRow>> {
    let mut statement = conn.prepare(sql)?;
    let mut rows = statement.query(params_from_iter(params))?;
    let column_count = rows
        .as_ref()
        .map(|statement| statement.column_count())
        .unwrap_or(0);

    let mut table_rows = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0..column_count {
            let value: Value = row.get(index)?;
            values.push(value_to_cell(value)?);
        }
        table_rows.push(TableRow::new(values));
    }

    Ok(table_rows)
}

fn sql_error(err: duckdb::Error, sql: &str) -> EngineError {
    let message = err.to_string();

    engine_error!(
        ErrorKind::DestinationQueryFailed,
        "Analytical store statement failed",
        format!("{message} (sql: {sql})")
    )
    .classify_driver_message(&message)
}

fn sql_context(err: EngineError, sql: &str) -> EngineError {
    match err.kind() {
        ErrorKind::DestinationQueryFailed => engine_error!(
            ErrorKind::DestinationQueryFailed,
            "Analytical store query failed",
            format!("{} (sql: {sql})", err.detail().unwrap_or_default())
        )
        .caused_by(&err),
        _ => err,
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

pub(crate) fn cell_to_value(cell: Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Boolean(value),
        Cell::I8(value) => Value::TinyInt(value),
        Cell::I16(value) => Value::SmallInt(value),
        Cell::I32(value) => Value::Int(value),
        Cell::I64(value) => Value::BigInt(value),
        Cell::F32(value) => Value::Float(value),
        Cell::F64(value) => Value::Double(value),
        // Cast by the store to the column's precision and scale.
        Cell::Decimal(value) => Value::Text(value.to_string()),
        Cell::String(value) => Value::Text(value),
        Cell::Date(value) => Value::Date32(value.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
        Cell::Time(value) => Value::Time64(
            TimeUnit::Microsecond,
            i64::from(value.num_seconds_from_midnight()) * 1_000_000
                + i64::from(value.nanosecond() / 1_000),
        ),
        Cell::TimeStamp(value) => {
            Value::Timestamp(TimeUnit::Microsecond, value.and_utc().timestamp_micros())
        }
        Cell::TimeStampTz(value) => Value::Text(value.to_rfc3339()),
        Cell::Bytes(value) => Value::Blob(value),
    }
}

fn value_to_cell(value: Value) -> EngineResult<Cell> {
    let cell = match value {
        Value::Null => Cell::Null,
        Value::Boolean(value) => Cell::Bool(value),
        Value::TinyInt(value) => Cell::I8(value),
        Value::SmallInt(value) => Cell::I16(value),
        Value::Int(value) => Cell::I32(value),
        Value::BigInt(value) => Cell::I64(value),
        Value::HugeInt(value) => match i64::try_from(value) {
            Ok(value) => Cell::I64(value),
            Err(_) => Cell::String(value.to_string()),
        },
        Value::UTinyInt(value) => Cell::I16(i16::from(value)),
        Value::USmallInt(value) => Cell::I32(i32::from(value)),
        Value::UInt(value) => Cell::I64(i64::from(value)),
        Value::UBigInt(value) => match i64::try_from(value) {
            Ok(value) => Cell::I64(value),
            Err(_) => Cell::String(value.to_string()),
        },
        Value::Float(value) => Cell::F32(value),
        Value::Double(value) => Cell::F64(value),
        Value::Decimal(value) => Cell::Decimal(BigDecimal::from_str(&value.to_string())?),
        Value::Text(value) => Cell::String(value),
        Value::Blob(value) => Cell::Bytes(value),
        Value::Date32(days) => {
            match NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE) {
                Some(date) => Cell::Date(date),
                None => bail!(
                    ErrorKind::ConversionError,
                    "Date out of range",
                    format!("{days} days since epoch")
                ),
            }
        }
        Value::Time64(unit, value) => {
            let micros = to_micros(unit, value);
            let seconds = u32::try_from(micros / 1_000_000)?;
            let nanos = u32::try_from((micros % 1_000_000) * 1_000)?;
            match NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos) {
                Some(time) => Cell::Time(time),
                None => bail!(
                    ErrorKind::ConversionError,
                    "Time out of range",
                    format!("{micros} microseconds since midnight")
                ),
            }
        }
        Value::Timestamp(unit, value) => {
            let micros = to_micros(unit, value);
            match DateTime::from_timestamp_micros(micros) {
                Some(timestamp) => Cell::TimeStamp(timestamp.naive_utc()),
                None => bail!(
                    ErrorKind::ConversionError,
                    "Timestamp out of range",
                    format!("{micros} microseconds since epoch")
                ),
            }
        }
        other => Cell::String(format!("{other:?}")),
    };

    Ok(cell)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_reports_changed_rows() {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        store.execute("CREATE TABLE t (id INTEGER)").await.unwrap();

        let changed = store
            .execute("INSERT INTO t SELECT * FROM range(5)")
            .await
            .unwrap();
        assert_eq!(changed, 5);
        assert_eq!(store.changes(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_statements_carry_the_sql() {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        let err = store.execute("SELECT * FROM missing_table").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert!(err.detail().unwrap().contains("missing_table"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn values_round_trip_through_appender_and_query() {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        store
            .execute(
                "CREATE TABLE main.v (b BOOLEAN, i INTEGER, d DECIMAL(10,2), s VARCHAR, \
                 dt DATE, ts TIMESTAMP, bl BLOB)",
            )
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        let timestamp = NaiveDateTime::parse_from_str("2021-06-01 12:30:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let row = TableRow::new(vec![
            Cell::Bool(true),
            Cell::I32(7),
            Cell::Decimal(BigDecimal::from_str("12.34").unwrap()),
            Cell::Null,
            Cell::Date(date),
            Cell::TimeStamp(timestamp),
            Cell::Bytes(vec![1, 2, 3]),
        ]);
        store
            .append_rows(&TableRef::new("memory", "main", "v"), vec![row])
            .await
            .unwrap();

        let rows = store
            .query("SELECT b, i, d::VARCHAR, s, dt, ts, bl FROM main.v")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let values = &rows[0].values;
        assert_eq!(values[0], Cell::Bool(true));
        assert_eq!(values[1], Cell::I32(7));
        assert_eq!(values[2], Cell::String("12.34".to_string()));
        assert_eq!(values[3], Cell::Null);
        assert_eq!(values[4], Cell::Date(date));
        assert_eq!(values[5], Cell::TimeStamp(timestamp));
        assert_eq!(values[6], Cell::Bytes(vec![1, 2, 3]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_params_binds_values() {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        let rows = store
            .query_params("SELECT ? + 1, ?", &[Cell::I64(41), Cell::from("x")])
            .await
            .unwrap();

        assert_eq!(rows[0].get_i64(0).unwrap(), Some(42));
        assert_eq!(rows[0].get_string(1).unwrap(), Some("x".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn appends_to_attached_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let store = DuckDbStore::open_in_memory().await.unwrap();
        store
            .attach_file(&dir.path().join("nested/acme.db"), "acme")
            .await
            .unwrap();
        store
            .execute("CREATE TABLE acme.main.person (id BIGINT)")
            .await
            .unwrap();

        store
            .append_rows(
                &TableRef::new("acme", "main", "person"),
                vec![TableRow::new(vec![Cell::I64(1)])],
            )
            .await
            .unwrap();

        let rows = store.query("SELECT count(*) FROM acme.main.person").await.unwrap();
        assert_eq!(rows[0].get_i64(0).unwrap(), Some(1));

        let current = store.query("SELECT current_database()").await.unwrap();
        assert_eq!(current[0].get_string(0).unwrap(), Some("memory".to_string()));

        store.detach("acme").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rollback_discards_appended_rows() {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        store.execute("CREATE TABLE main.t (id BIGINT)").await.unwrap();

        store.begin().await.unwrap();
        store
            .append_rows(
                &TableRef::new("memory", "main", "t"),
                vec![TableRow::new(vec![Cell::I64(1)])],
            )
            .await
            .unwrap();
        store.rollback().await.unwrap();

        let rows = store.query("SELECT count(*) FROM main.t").await.unwrap();
        assert_eq!(rows[0].get_i64(0).unwrap(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forked_sessions_see_committed_data_and_closed_handles_fail() {
        let store = DuckDbStore::open_in_memory().await.unwrap();
        store.execute("CREATE TABLE main.t (id BIGINT)").await.unwrap();
        store.execute("INSERT INTO main.t VALUES (1)").await.unwrap();

        let fork = store.fork_session().await.unwrap();
        let rows = fork.query("SELECT count(*) FROM main.t").await.unwrap();
        assert_eq!(rows[0].get_i64(0).unwrap(), Some(1));

        store.close().await.unwrap();
        assert_eq!(
            store.query("SELECT 1").await.unwrap_err().kind(),
            ErrorKind::ResourceClosed
        );
        assert!(fork.query("SELECT 1").await.is_ok());
    }
}
