use std::sync::Arc;

use cache::ErrorKind;
use cache::source::duckdb::DuckDbDriver;
use cache::source::pool::PoolMode;
use cache::source::{ConnectionPool, SourceDriver};
use cache_config::shared::{PoolConfig, SourceCredentials};

use crate::common::setup;

mod common;

fn driver() -> Arc<dyn SourceDriver> {
    Arc::new(DuckDbDriver)
}

#[tokio::test(flavor = "multi_thread")]
async fn embedded_sources_share_one_direct_connection() {
    let dirs = setup();
    let credentials = SourceCredentials::embedded(dirs.source.display().to_string());

    let pool = ConnectionPool::open(driver(), credentials, PoolConfig::default(), true)
        .await
        .unwrap();
    assert_eq!(pool.mode(), PoolMode::Direct);
    assert_eq!(pool.idle_connections(), 1);

    {
        let mut conn = pool.get().await.unwrap();
        assert_eq!(pool.idle_connections(), 0);
        let tables = conn.list_tables("main").await.unwrap();
        assert_eq!(tables, vec!["observation", "person", "visit_occurrence"]);
    }
    assert_eq!(pool.idle_connections(), 1);

    pool.close().await;
    assert!(pool.is_closed());
    assert_eq!(pool.idle_connections(), 0);
    let err = pool.get().await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ResourceClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn opening_an_unreachable_source_fails_fast() {
    let dirs = setup();
    let credentials =
        SourceCredentials::embedded(dirs.cache_dir.join("nope.duckdb").display().to_string());

    let err = ConnectionPool::open(driver(), credentials, PoolConfig::default(), true)
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
    assert!(err.to_string().contains("Failed to connect to source"));
    assert!(err.is_transient());
}

#[tokio::test(flavor = "multi_thread")]
async fn scoped_pools_are_closed_after_a_panic() {
    let dirs = setup();
    let credentials = SourceCredentials::embedded(dirs.source.display().to_string());
    let pool = ConnectionPool::open(driver(), credentials, PoolConfig::default(), false)
        .await
        .unwrap();
    let observer = pool.clone();

    let outcome = pool
        .run_scoped(|pool| async move {
            let _conn = pool.get().await.unwrap();
            panic!("boom");
        })
        .await;

    assert!(outcome.is_err());
    assert!(observer.is_closed());
}
