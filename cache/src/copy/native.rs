//! Copies through the analytical store's own scanner of an attached source catalog.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cache_config::shared::{CacheConfig, CopyStrategy, NativeDialect, SourceCredentials};
use tracing::{error, info, warn};

use crate::bail;
use crate::copy::in_transaction;
use crate::error::{EngineResult, ErrorKind};
use crate::identifier::{self, IdentifierKind};
use crate::source::SourceQuery;
use crate::store::{AnalyticalStore, AttachOptions};
use crate::types::mapping::wire;
use crate::types::{CopyPhase, SourceColumn, TableCopyError, TableCopyResult};

/// Prefix of the catalog alias a native source is attached under.
const SOURCE_ALIAS_PREFIX: &str = "__source_";

/// Resolves the native source a job copies from.
pub type NativeSourceFactory =
    Arc<dyn Fn(&CacheConfig) -> EngineResult<NativeSource> + Send + Sync>;

/// A source database attached to the store and scanned by it.
#[derive(Clone)]
pub struct NativeSource {
    extension: Option<&'static str>,
    alias: String,
    location: String,
}

impl NativeSource {
    /// Describes the source of `config`, failing for cursor based dialects.
    pub fn new(config: &CacheConfig) -> EngineResult<Self> {
        let credentials = &config.credentials;
        let CopyStrategy::NativeScanner(dialect) = credentials.dialect().strategy() else {
            bail!(
                ErrorKind::ConfigError,
                "Dialect has no native scanner",
                credentials.dialect()
            );
        };

        let extension = match dialect {
            NativeDialect::Postgres => "postgres",
            NativeDialect::BigQuery => "bigquery",
        };

        Ok(Self {
            extension: Some(extension),
            alias: source_alias(&config.database_code),
            location: attach_location(dialect, credentials),
        })
    }

    /// A snapshot of the source in the store's own file format, attached without a scanner.
    pub fn from_file(database_code: &str, path: &Path) -> Self {
        Self {
            extension: None,
            alias: source_alias(database_code),
            location: path.to_string_lossy().into_owned(),
        }
    }

    /// Catalog alias of the attached source.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Store extension scanning this source, [`None`] for file snapshots.
    pub fn extension(&self) -> Option<&'static str> {
        self.extension
    }

    /// Loads the scanner extension and attaches the source read only.
    pub async fn attach<S>(&self, store: &S) -> EngineResult<()>
    where
        S: AnalyticalStore,
    {
        let options = match self.extension {
            Some(extension) => {
                store.load_extension(extension).await?;
                AttachOptions::read_only(extension)
            }
            None => AttachOptions {
                db_type: None,
                read_only: true,
            },
        };
        store.attach(&self.location, &self.alias, &options).await?;

        info!(alias = %self.alias, extension = ?self.extension, "native source attached");

        Ok(())
    }

    pub async fn detach<S>(&self, store: &S) -> EngineResult<()>
    where
        S: AnalyticalStore,
    {
        store.detach(&self.alias).await
    }

    /// Base tables of `schema` in the attached source, by name.
    pub async fn list_tables<S>(&self, store: &S, schema: &str) -> EngineResult<Vec<String>>
    where
        S: AnalyticalStore,
    {
        list_tables(store, &self.alias, schema).await
    }
}

/// Alias of the attached source of the cache `database_code`.
pub fn source_alias(database_code: &str) -> String {
    format!("{SOURCE_ALIAS_PREFIX}{}", database_code.replace('-', "_"))
}

fn attach_location(dialect: NativeDialect, credentials: &SourceCredentials) -> String {
    match dialect {
        NativeDialect::Postgres => {
            let mut params = vec![
                format!("host={}", libpq_value(credentials.host().unwrap_or_default())),
                format!("port={}", credentials.port()),
                format!(
                    "dbname={}",
                    libpq_value(credentials.database().unwrap_or_default())
                ),
            ];
            if let Some(user) = credentials.user() {
                params.push(format!("user={}", libpq_value(user)));
            }
            if let Some(password) = credentials.password() {
                params.push(format!("password={}", libpq_value(password.expose())));
            }

            params.join(" ")
        }
        NativeDialect::BigQuery => {
            format!("project={}", credentials.database().unwrap_or_default())
        }
    }
}

/// Quotes a libpq connection parameter value.
fn libpq_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Base tables of `catalog.schema` in discovery order.
pub async fn list_tables<S>(store: &S, catalog: &str, schema: &str) -> EngineResult<Vec<String>>
where
    S: AnalyticalStore,
{
    let rows = store
        .query_params(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_catalog = ? AND table_schema = ? AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[catalog.into(), schema.into()],
        )
        .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(table) = row.get_string(0)? {
            tables.push(table);
        }
    }

    Ok(tables)
}

async fn list_columns<S>(
    store: &S,
    catalog: &str,
    schema: &str,
    table: &str,
) -> EngineResult<Vec<SourceColumn>>
where
    S: AnalyticalStore,
{
    let rows = store
        .query_params(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_catalog = ? AND table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            &[catalog.into(), schema.into(), table.into()],
        )
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(name) = row.get_string(0)? {
            // The store maps types itself on this path.
            columns.push(SourceColumn::new(name, wire::OTHER));
        }
    }

    Ok(columns)
}

/// Copies `table` from the attached catalog `source_alias` into the cache.
///
/// The destination is recreated from the shape of the source projection, then filled with a
/// single `INSERT ... SELECT`. The row count comes from the store's change counter.
pub async fn copy_native_table<S>(
    store: &S,
    config: &CacheConfig,
    source_alias: &str,
    table: &str,
) -> Result<TableCopyResult, TableCopyError>
where
    S: AnalyticalStore,
{
    let started = Instant::now();

    let result = in_transaction(
        store,
        config.use_transactions,
        table,
        copy_native_rows(store, config, source_alias, table),
    )
    .await;

    match result {
        Ok(rows_copied) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(table, rows = rows_copied, duration_ms, "native table copy finished");

            Ok(TableCopyResult {
                table: table.to_owned(),
                rows_copied,
                duration_ms,
            })
        }
        Err(err) => {
            error!(table, error = %err, "native table copy failed");

            Err(TableCopyError {
                table: table.to_owned(),
                error: err.to_string(),
                phase: CopyPhase::Copy,
                transient: err.is_transient(),
            })
        }
    }
}

async fn copy_native_rows<S>(
    store: &S,
    config: &CacheConfig,
    source_alias: &str,
    table: &str,
) -> EngineResult<u64>
where
    S: AnalyticalStore,
{
    identifier::validate(config.target_schema(), IdentifierKind::Schema)?;
    identifier::validate(table, IdentifierKind::Table)?;

    let columns = list_columns(store, source_alias, &config.schema_name, table).await?;
    if columns.is_empty() {
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
    let query = SourceQuery::new(&config.schema_name, table, &columns, selected)?
        .with_catalog(source_alias)
        .with_patient_filter(config.patient_filter.as_deref())
        .with_timestamp_filter(config.timestamp_filter.as_deref());

    let destination =
        identifier::qualified_table(&config.database_code, config.target_schema(), table)?;

    store
        .execute(&format!(
            "CREATE OR REPLACE TABLE {destination} AS {}",
            query.to_shape_sql()?
        ))
        .await?;
    store
        .execute_params(
            &format!("INSERT INTO {destination} {}", query.to_sql()?),
            &query.params(),
        )
        .await?;

    let rows = store.changes();
    if rows == 0 {
        warn!(table, "source table is empty");
    }

    Ok(rows)
}
