use std::path::PathBuf;

use cache::CacheEngine;
use cache::store::{AnalyticalStore, DuckDbStore};
use cache::test_utils::database::seed_source_database;
use cache_telemetry::init_test_tracing;
use tempfile::TempDir;

/// A seeded source database and a cache directory, removed on drop.
pub struct TestDirs {
    _dir: TempDir,
    pub source: PathBuf,
    pub cache_dir: PathBuf,
}

pub fn setup() -> TestDirs {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.duckdb");
    seed_source_database(&source).unwrap();

    TestDirs {
        source,
        cache_dir: dir.path().join("caches"),
        _dir: dir,
    }
}

pub async fn spawn_engine() -> CacheEngine<DuckDbStore> {
    let store = DuckDbStore::open_in_memory().await.unwrap();
    CacheEngine::new(store).await.unwrap()
}

pub async fn count_rows<S: AnalyticalStore>(store: &S, code: &str, table: &str) -> i64 {
    let rows = store
        .query(&format!("SELECT count(*) FROM \"{code}\".\"main\".\"{table}\""))
        .await
        .unwrap();

    rows[0].get_i64(0).unwrap().unwrap()
}

pub async fn cached_tables<S: AnalyticalStore>(store: &S, code: &str) -> Vec<String> {
    cache::copy::native::list_tables(store, code, "main")
        .await
        .unwrap()
}

/// Column names and types of a cached table, in ordinal order.
pub async fn cached_columns<S: AnalyticalStore>(
    store: &S,
    code: &str,
    table: &str,
) -> Vec<(String, String)> {
    let rows = store
        .query_params(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_catalog = ? AND table_schema = 'main' AND table_name = ? \
             ORDER BY ordinal_position",
            &[code.into(), table.into()],
        )
        .await
        .unwrap();

    rows.iter()
        .map(|row| {
            (
                row.get_string(0).unwrap().unwrap(),
                row.get_string(1).unwrap().unwrap(),
            )
        })
        .collect()
}
