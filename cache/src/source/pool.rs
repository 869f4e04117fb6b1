//! Bounded pool of source connections.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cache_config::shared::{PoolConfig, SourceCredentials};
use deadpool::Runtime;
use deadpool::managed::{self, Metrics, PoolError, RecycleError, RecycleResult};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::source::{SourceConnection, SourceDriver};
use crate::{bail, engine_error};

/// How connections are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// Up to `size` read only connections, recycled between uses.
    Pooled,
    /// A single connection reused for every table.
    Direct,
}

/// Opens and recycles connections of one source for [`ConnectionPool`].
pub struct SourceManager {
    driver: Arc<dyn SourceDriver>,
    credentials: SourceCredentials,
    config: PoolConfig,
    read_only: bool,
}

impl managed::Manager for SourceManager {
    type Type = Box<dyn SourceConnection>;
    type Error = EngineError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let timeout = self.config.connection_timeout();
        let connect = self
            .driver
            .connect(&self.credentials, self.read_only, timeout);

        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => bail!(
                ErrorKind::SourceTimeout,
                "Timed out connecting to source",
                format!(
                    "{} after {} ms",
                    self.credentials.source_key(),
                    timeout.as_millis()
                )
            ),
        }
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        let expired = metrics.age() >= self.config.max_lifetime()
            || metrics.last_used() >= self.config.idle_timeout();

        if !expired && conn.is_valid().await {
            return Ok(());
        }

        debug!(expired, "discarding source connection");
        if let Err(err) = conn.close().await {
            warn!(error = %err, "failed to close source connection");
        }

        Err(RecycleError::Backend(engine_error!(
            ErrorKind::ResourceClosed,
            "Source connection expired or is no longer valid"
        )))
    }
}

/// A connection checked out of a [`ConnectionPool`], returned to it on drop.
pub type PooledConnection = managed::Object<SourceManager>;

/// Pool of connections to one source database.
///
/// Pooling is bypassed for the embedded dialect and when disabled in the configuration, in which
/// case a single connection is shared. Connections are read only except for the embedded dialect.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: managed::Pool<SourceManager>,
    mode: PoolMode,
}

impl ConnectionPool {
    /// Opens the pool and eagerly connects once, failing fast when the source is unreachable or
    /// rejects the credentials.
    pub async fn open(
        driver: Arc<dyn SourceDriver>,
        credentials: SourceCredentials,
        config: PoolConfig,
        use_pooling: bool,
    ) -> EngineResult<Self> {
        let dialect = credentials.dialect();
        let mode = if dialect.is_embedded() || !use_pooling {
            PoolMode::Direct
        } else {
            PoolMode::Pooled
        };
        let size = match mode {
            PoolMode::Pooled => config.size.max(1),
            PoolMode::Direct => 1,
        };
        let wait_timeout = config.connection_timeout();

        let manager = SourceManager {
            driver,
            read_only: !dialect.is_embedded(),
            credentials,
            config,
        };
        let pool = managed::Pool::builder(manager)
            .max_size(size)
            .wait_timeout(Some(wait_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| {
                engine_error!(
                    ErrorKind::ConfigError,
                    "Invalid source connection pool",
                    err
                )
            })?;

        let pool = Self { pool, mode };

        // Returned to the pool right away, so the first table reuses it.
        pool.get().await.map_err(|err| {
            let kind = match err.kind() {
                ErrorKind::AuthenticationError | ErrorKind::SourceTimeout => err.kind(),
                _ => ErrorKind::SourceConnectionFailed,
            };
            engine_error!(kind, "Failed to connect to source", err.to_string())
        })?;

        info!(
            source = %pool.credentials().source_key(),
            ?mode,
            size,
            "source connection pool opened"
        );

        Ok(pool)
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn credentials(&self) -> &SourceCredentials {
        &self.pool.manager().credentials
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Number of connections waiting to be reused.
    pub fn idle_connections(&self) -> usize {
        self.pool.status().available
    }

    /// Checks out a connection, waiting at most the connection timeout for a free slot.
    pub async fn get(&self) -> EngineResult<PooledConnection> {
        self.pool.get().await.map_err(|err| match err {
            PoolError::Backend(err) => err,
            PoolError::Closed => {
                engine_error!(ErrorKind::ResourceClosed, "Connection pool is closed")
            }
            PoolError::Timeout(_) => engine_error!(
                ErrorKind::SourceTimeout,
                "Timed out waiting for a pooled connection",
                format!("{} ms", self.pool.manager().config.connection_timeout_ms)
            ),
            other => engine_error!(
                ErrorKind::SourceConnectionFailed,
                "Source connection pool failed",
                other
            ),
        })
    }

    /// Closes every idle connection. Checked out connections are dropped when returned.
    ///
    /// Only the first call has an effect.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }

        let idle = self.pool.retain(|_, _| false).removed;
        self.pool.close();

        for mut conn in idle {
            if let Err(err) = conn.close().await {
                warn!(error = %err, "failed to close source connection");
            }
        }

        info!(source = %self.credentials().source_key(), "source connection pool closed");
    }

    /// Runs `f` with this pool and closes the pool afterwards, also when `f` panics.
    ///
    /// A panic is returned as the error so the caller can record it.
    pub async fn run_scoped<F, Fut, T>(self, f: F) -> Result<T, Box<dyn Any + Send>>
    where
        F: FnOnce(ConnectionPool) -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(f(self.clone())).catch_unwind().await;
        self.close().await;

        outcome
    }
}
