//! Cursor based copy of one source table into the analytical store.

use std::time::Instant;

use cache_config::shared::CacheConfig;
use tracing::{debug, error, info, warn};

use crate::conversions::convert_value;
use crate::copy::in_transaction;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::identifier::{self, IdentifierKind};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::source::{ConnectionPool, SourceCursor, SourceQuery};
use crate::store::{AnalyticalStore, TableAppender};
use crate::types::{
    ColumnInfo, CopyPhase, TableCopyError, TableCopyResult, TableRef, TypeMapping,
};
use crate::{bail, engine_error};

/// Everything a table copy needs besides the pool and the store.
#[derive(Clone, Copy)]
pub struct TableCopyContext<'a> {
    pub config: &'a CacheConfig,
    pub mapping: &'a TypeMapping,
    pub sink: &'a dyn ProgressSink,
}

impl<'a> TableCopyContext<'a> {
    pub fn new(
        config: &'a CacheConfig,
        mapping: &'a TypeMapping,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            mapping,
            sink,
        }
    }

    fn destination(&self, table: &str) -> TableRef {
        TableRef::new(
            self.config.database_code.as_str(),
            self.config.target_schema(),
            table,
        )
    }
}

/// Copies `table` from the source schema into the cache schema.
///
/// The destination table is dropped and recreated from the cursor metadata, then filled through
/// the appender. With transactions enabled the whole copy is atomic. Failures never escape, they
/// are returned as a [`TableCopyError`] tagged with the data phase.
pub async fn copy_table<S>(
    pool: &ConnectionPool,
    store: &S,
    ctx: &TableCopyContext<'_>,
    table: &str,
) -> Result<TableCopyResult, TableCopyError>
where
    S: AnalyticalStore,
{
    let started = Instant::now();

    match copy_table_inner(pool, store, ctx, table).await {
        Ok(rows_copied) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(table, rows = rows_copied, duration_ms, "table copy finished");

            Ok(TableCopyResult {
                table: table.to_owned(),
                rows_copied,
                duration_ms,
            })
        }
        Err(err) => {
            error!(table, error = %err, "table copy failed");

            Err(TableCopyError {
                table: table.to_owned(),
                error: err.to_string(),
                phase: CopyPhase::Data,
                transient: err.is_transient(),
            })
        }
    }
}

async fn copy_table_inner<S>(
    pool: &ConnectionPool,
    store: &S,
    ctx: &TableCopyContext<'_>,
    table: &str,
) -> EngineResult<u64>
where
    S: AnalyticalStore,
{
    identifier::validate(ctx.config.target_schema(), IdentifierKind::Schema)?;
    identifier::validate(table, IdentifierKind::Table)?;

    in_transaction(
        store,
        ctx.config.use_transactions,
        table,
        copy_rows(pool, store, ctx, table),
    )
    .await
}

async fn copy_rows<S>(
    pool: &ConnectionPool,
    store: &S,
    ctx: &TableCopyContext<'_>,
    table: &str,
) -> EngineResult<u64>
where
    S: AnalyticalStore,
{
    let config = ctx.config;
    let mut conn = pool.get().await?;

    let source_columns = conn.list_columns(&config.schema_name, table).await?;
    if source_columns.is_empty() {
        bail!(
            ErrorKind::SourceQueryFailed,
            "Source table does not exist",
            format!("{}.{table}", config.schema_name)
        );
    }

    let selected = config
        .table_filter
        .as_ref()
        .and_then(|filter| filter.columns(table));
    let query = SourceQuery::new(&config.schema_name, table, &source_columns, selected)?
        .with_patient_filter(config.patient_filter.as_deref())
        .with_timestamp_filter(config.timestamp_filter.as_deref());

    let estimated_rows = match conn.estimate_rows(&config.schema_name, table).await {
        Ok(estimate) => estimate,
        Err(err) => {
            debug!(table, error = %err, "row estimate unavailable");
            None
        }
    };

    let mut cursor = conn.open_cursor(&query, config.fetch_size).await?;
    let columns: Vec<ColumnInfo> = cursor
        .columns()
        .iter()
        .map(|column| ctx.mapping.column_info(column))
        .collect();

    let destination = ctx.destination(table);
    let qualified =
        identifier::qualified_table(&destination.catalog, &destination.schema, &destination.table)?;
    store
        .execute(&format!("DROP TABLE IF EXISTS {qualified}"))
        .await?;
    store
        .execute(&create_table_sql(&qualified, &columns)?)
        .await?;

    let mut appender = store.create_appender(destination);
    let streamed = stream_rows(
        cursor.as_mut(),
        &mut appender,
        &columns,
        ctx,
        table,
        estimated_rows,
    )
    .await;
    let closed = appender.close().await;
    let rows = streamed?;
    closed?;

    Ok(rows)
}

async fn stream_rows<S>(
    cursor: &mut dyn SourceCursor,
    appender: &mut TableAppender<'_, S>,
    columns: &[ColumnInfo],
    ctx: &TableCopyContext<'_>,
    table: &str,
    estimated_rows: Option<u64>,
) -> EngineResult<u64>
where
    S: AnalyticalStore,
{
    let batch_size = ctx.config.batch_size.max(1);
    let progress_interval = ctx.config.progress_interval.max(1);
    let mut rows: u64 = 0;

    while let Some(values) = cursor.next_row().await? {
        if values.len() != columns.len() {
            bail!(
                ErrorKind::InvalidData,
                "Source row width does not match its columns",
                format!("expected {} values, got {}", columns.len(), values.len())
            );
        }

        appender.begin_row()?;
        for (value, column) in values.into_iter().zip(columns) {
            let cell = convert_value(value, &column.dest_type)
                .map_err(|err| conversion_error(err, table, &column.name))?;
            appender.append(cell)?;
        }
        appender.end_row()?;
        rows += 1;

        if appender.pending_rows() >= batch_size {
            appender.flush().await?;
        }

        if rows % progress_interval == 0 {
            ctx.sink.emit(ProgressEvent::RowProgress {
                table: table.to_owned(),
                rows_processed: rows,
                estimated_rows,
            });
        }
    }

    if rows == 0 {
        warn!(table, "source table is empty");
    }

    Ok(rows)
}

fn conversion_error(err: EngineError, table: &str, column: &str) -> EngineError {
    engine_error!(
        err.kind(),
        "Value conversion failed",
        format!("{table}.{column}: {err}")
    )
    .caused_by(&err)
}

/// Renders the `CREATE TABLE IF NOT EXISTS` statement for the mapped columns.
pub fn create_table_sql(qualified_table: &str, columns: &[ColumnInfo]) -> EngineResult<String> {
    let definitions = columns
        .iter()
        .map(|column| {
            let name = identifier::quote(&column.name)?;
            let not_null = if column.nullable { "" } else { " NOT NULL" };
            Ok(format!("{name} {}{not_null}", column.dest_type.sql_name()))
        })
        .collect::<EngineResult<Vec<_>>>()?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {qualified_table} ({})",
        definitions.join(", ")
    ))
}
