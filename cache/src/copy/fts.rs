//! Full-text indexes built over copied tables.

use cache_config::shared::CacheConfig;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::identifier::{self, IdentifierKind, quote_literal};
use crate::store::AnalyticalStore;
use crate::types::TableCopyResult;

/// Extension providing `create_fts_index`.
pub const FTS_EXTENSION: &str = "fts";

/// Builds a full-text index for every copied table listed in `fts_tables`.
///
/// Returns the tables that were indexed. Failures are logged and leave the table out of the
/// result, an index that already exists counts as built.
pub async fn build_fts_indexes<S>(
    store: &S,
    config: &CacheConfig,
    copied: &[TableCopyResult],
) -> Vec<String>
where
    S: AnalyticalStore,
{
    let tables: Vec<&str> = copied
        .iter()
        .map(|result| result.table.as_str())
        .filter(|table| config.fts_tables.iter().any(|name| name == table))
        .collect();
    if tables.is_empty() {
        return Vec::new();
    }

    if let Err(err) = store.load_extension(FTS_EXTENSION).await {
        warn!(error = %err, "full-text search extension unavailable, skipping indexes");
        return Vec::new();
    }

    let mut indexed = Vec::with_capacity(tables.len());
    for table in tables {
        match build_index(store, config, table).await {
            Ok(true) => {
                info!(table, "full-text index built");
                indexed.push(table.to_owned());
            }
            Ok(false) => warn!(table, "table has no text columns, skipping full-text index"),
            Err(err) if is_already_exists(&err.to_string()) => indexed.push(table.to_owned()),
            Err(err) => warn!(table, error = %err, "failed to build full-text index"),
        }
    }

    indexed
}

async fn build_index<S>(store: &S, config: &CacheConfig, table: &str) -> EngineResult<bool>
where
    S: AnalyticalStore,
{
    let schema = config.target_schema();
    identifier::validate(&config.database_code, IdentifierKind::DatabaseCode)?;
    identifier::validate(schema, IdentifierKind::Schema)?;
    identifier::validate(table, IdentifierKind::Table)?;

    let rows = store
        .query_params(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_catalog = ? AND table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            &[
                config.database_code.as_str().into(),
                schema.into(),
                table.into(),
            ],
        )
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        if let (Some(name), Some(data_type)) = (row.get_string(0)?, row.get_string(1)?) {
            identifier::validate(&name, IdentifierKind::Column)?;
            columns.push((name, data_type));
        }
    }

    // The first column identifies documents.
    let Some((id_column, _)) = columns.first() else {
        return Ok(false);
    };
    let text_columns: Vec<String> = columns
        .iter()
        .filter(|(_, data_type)| data_type.eq_ignore_ascii_case("VARCHAR"))
        .map(|(name, _)| quote_literal(name))
        .collect();
    if text_columns.is_empty() {
        return Ok(false);
    }

    let sql = format!(
        "PRAGMA create_fts_index({}, {}, {}, overwrite=1)",
        quote_literal(&format!("{}.{schema}.{table}", config.database_code)),
        quote_literal(id_column),
        text_columns.join(", ")
    );
    store.execute(&sql).await?;

    Ok(true)
}

fn is_already_exists(message: &str) -> bool {
    message.to_lowercase().contains("already exists")
}
