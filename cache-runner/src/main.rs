use cache_config::shared::RunnerConfig;
use cache_telemetry::init_tracing;
use tracing::error;

use crate::config::load_runner_config;
use crate::core::run_cache_job;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let runner_config = load_runner_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(runner_config))?;

    Ok(())
}

async fn async_main(runner_config: RunnerConfig) -> anyhow::Result<()> {
    if let Err(err) = run_cache_job(runner_config).await {
        error!("an error occurred in the cache runner: {err:#}");

        return Err(err);
    }

    Ok(())
}
