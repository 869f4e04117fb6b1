//! Table copy strategies and the helpers they share.
//!
//! [`table`] streams rows from a source cursor through the appender, [`native`] lets the
//! analytical store scan an attached source catalog itself, and [`fts`] builds full-text
//! indexes once tables are copied.

use std::collections::HashSet;
use std::future::Future;

use cache_config::shared::TableFilter;
use tracing::{debug, error, warn};

use crate::error::EngineResult;
use crate::store::AnalyticalStore;

pub mod fts;
pub mod native;
pub mod table;

pub use native::{NativeSource, NativeSourceFactory, copy_native_table};
pub use table::{TableCopyContext, copy_table, create_table_sql};

/// Runs `work` inside a store transaction when `enabled`.
///
/// Commits on success and rolls back on failure. A failed rollback is logged and the original
/// failure is returned.
pub(crate) async fn in_transaction<S, F, T>(
    store: &S,
    enabled: bool,
    table: &str,
    work: F,
) -> EngineResult<T>
where
    S: AnalyticalStore,
    F: Future<Output = EngineResult<T>>,
{
    if !enabled {
        return work.await;
    }

    store.begin().await?;
    let result = match work.await {
        Ok(value) => store.commit().await.map(|_| value),
        Err(err) => Err(err),
    };

    if let Err(err) = &result {
        debug!(table, error = %err, "rolling back table copy");
        if let Err(rollback_err) = store.rollback().await {
            error!(table, error = %rollback_err, "failed to roll back table copy");
        }
    }

    result
}

/// Base tables of `catalog.schema` in the analytical store.
pub async fn destination_tables<S>(
    store: &S,
    catalog: &str,
    schema: &str,
) -> EngineResult<HashSet<String>>
where
    S: AnalyticalStore,
{
    let tables = native::list_tables(store, catalog, schema).await?;

    Ok(tables.into_iter().collect())
}

/// Orders and filters the discovered source tables.
///
/// With a table filter, tables come in filter order and listed tables missing from the source
/// are skipped. With `existing`, tables already present in the cache are skipped as well.
pub fn tables_to_copy(
    available: Vec<String>,
    filter: Option<&TableFilter>,
    existing: Option<&HashSet<String>>,
) -> Vec<String> {
    let selected = match filter.filter(|filter| !filter.is_empty()) {
        Some(filter) => filter
            .tables()
            .filter(|table| {
                let found = available.iter().any(|name| name == table);
                if !found {
                    warn!(table, "filtered table does not exist in the source schema");
                }
                found
            })
            .map(str::to_owned)
            .collect(),
        None => available,
    };

    match existing {
        Some(existing) => selected
            .into_iter()
            .filter(|table| {
                let done = existing.contains(table);
                if done {
                    debug!(table, "table already cached, skipping");
                }
                !done
            })
            .collect(),
        None => selected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available() -> Vec<String> {
        ["person", "visit_occurrence", "concept"]
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn discovery_order_is_kept_without_filter() {
        assert_eq!(
            tables_to_copy(available(), None, None),
            vec!["person", "visit_occurrence", "concept"]
        );
    }

    #[test]
    fn filter_order_wins_and_unknown_tables_are_skipped() {
        let filter = TableFilter::new()
            .with_table("concept", Vec::<String>::new())
            .with_table("note", Vec::<String>::new())
            .with_table("person", ["person_id"]);

        assert_eq!(
            tables_to_copy(available(), Some(&filter), None),
            vec!["concept", "person"]
        );
    }

    #[test]
    fn existing_tables_are_skipped_on_resume() {
        let existing: HashSet<String> = ["person".to_string()].into_iter().collect();
        assert_eq!(
            tables_to_copy(available(), None, Some(&existing)),
            vec!["visit_occurrence", "concept"]
        );
    }
}
