use cache::CacheEngine;
use cache::progress::TracingProgressSink;
use cache::store::DuckDbStore;
use cache::types::CacheResult;
use cache_config::shared::{CacheConfig, RunnerConfig, StoreConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

/// Runs the configured cache job to completion.
///
/// SIGINT and SIGTERM cancel the job, which then stops before its next table.
pub async fn run_cache_job(runner_config: RunnerConfig) -> anyhow::Result<()> {
    info!("starting cache runner");

    log_config(&runner_config);

    let store = open_store(&runner_config.store).await?;
    let engine = CacheEngine::new(store).await?;
    let config = runner_config.cache;

    let job = engine.create_cache(&config, Some(&TracingProgressSink));
    tokio::pin!(job);

    let result = tokio::select! {
        result = &mut job => result?,
        signal = shutdown_signal() => {
            signal?;
            if let Err(err) = engine.cancel_job(&config.database_code).await {
                warn!(error = %err, "failed to cancel cache job");
            }

            job.await?
        }
    };

    log_result(&result);

    if !result.success {
        anyhow::bail!(
            "cache job for `{}` did not complete: {}",
            result.database_code,
            result.error.as_deref().unwrap_or(if result.canceled {
                "canceled"
            } else {
                "some tables failed"
            })
        );
    }

    info!("cache runner completed");

    Ok(())
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<DuckDbStore> {
    let store = match &config.path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            DuckDbStore::open(path).await?
        }
        None => DuckDbStore::open_in_memory().await?,
    };

    Ok(store)
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, canceling cache job");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, canceling cache job");
        }
    }

    Ok(())
}

fn log_config(config: &RunnerConfig) {
    debug!(store_path = ?config.store.path, "store config");
    log_cache_config(&config.cache);
}

fn log_cache_config(config: &CacheConfig) {
    debug!(
        database_code = config.database_code,
        schema_name = config.schema_name,
        target_schema = config.target_schema(),
        source = %config.credentials.source_key(),
        dialect = %config.credentials.dialect(),
        cache_file = %config.cache_file().display(),
        "cache config"
    );
    debug!(
        batch_size = config.batch_size,
        fetch_size = config.fetch_size,
        parallel_copy = config.parallel_copy,
        max_parallel_tables = config.max_parallel_tables,
        use_transactions = config.use_transactions,
        use_pooling = config.use_pooling,
        resume = config.resume,
        "copy config"
    );
}

fn log_result(result: &CacheResult) {
    for failed in &result.tables_failed {
        warn!(table = failed.table, phase = %failed.phase, error = failed.error, "table not cached");
    }

    info!(
        success = result.success,
        canceled = result.canceled,
        tables_copied = result.tables_copied.len(),
        tables_failed = result.tables_failed.len(),
        fts_tables = ?result.fts_tables,
        rows = result.total_rows(),
        duration_ms = result.duration_ms,
        "cache job result"
    );
}
