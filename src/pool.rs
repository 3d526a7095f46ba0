//! Bounded connection pools built on `deadpool::managed`.

mod connection;
mod manager;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Pool, PoolError};
use serde::Serialize;
use tracing::{debug, warn};

pub use connection::PoolConnection;
pub use manager::ConnectionManager;

use crate::compiler::Compiler;
use crate::config::PoolConfig;
use crate::connection::Connector;
use crate::error::SqlFxError;
use crate::transform::TransformFn;

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently open, idle or checked out.
    pub size: usize,
    pub available: usize,
    /// Callers blocked in `acquire`.
    pub waiting: usize,
}

/// Pool of adapter sessions that hands out [`PoolConnection`]s.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<ConnectionManager>,
    compiler: Arc<Compiler>,
    transform: Option<TransformFn>,
    acquire_timeout: Option<Duration>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .field("compiler", &self.compiler.name())
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

fn map_pool_error(err: PoolError<SqlFxError>) -> SqlFxError {
    match err {
        PoolError::Backend(err) => err,
        other => SqlFxError::ConnectionError(format!("pool error: {other}")),
    }
}

impl ConnectionPool {
    /// Build the pool and open `config.min_size` connections up front.
    ///
    /// # Errors
    /// Returns `SqlFxError::ConfigError` for invalid bounds, or the connector's error when a
    /// warm-up connection cannot be opened.
    pub async fn new(
        connector: Arc<dyn Connector>,
        config: &PoolConfig,
        compiler: Arc<Compiler>,
        transform: Option<TransformFn>,
    ) -> Result<Self, SqlFxError> {
        config.validate()?;
        let pool = Pool::builder(ConnectionManager::new(connector, config.ttl))
            .max_size(config.max_size)
            .build()
            .map_err(|e| SqlFxError::ConfigError(format!("failed to build pool: {e}")))?;

        let mut warm = Vec::with_capacity(config.min_size);
        for _ in 0..config.min_size {
            warm.push(pool.get().await.map_err(map_pool_error)?);
        }
        drop(warm);
        debug!(
            min = config.min_size,
            max = config.max_size,
            "connection pool ready"
        );

        Ok(Self {
            pool,
            compiler,
            transform,
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Check out a connection, opening one when under `max_size` and waiting otherwise.
    ///
    /// # Errors
    /// Returns the connector's error, or `SqlFxError::ConnectionError` when the pool is
    /// closed or the acquire timeout elapses.
    pub async fn acquire(&self) -> Result<PoolConnection, SqlFxError> {
        let conn = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.pool.get())
                .await
                .map_err(|_| {
                    warn!(?limit, "timed out waiting for a connection");
                    SqlFxError::ConnectionError(format!(
                        "timed out after {limit:?} waiting for a connection"
                    ))
                })?,
            None => self.pool.get().await,
        }
        .map_err(map_pool_error)?;

        debug!(status = ?self.status(), "connection checked out");
        Ok(PoolConnection::new(
            conn,
            Arc::clone(&self.compiler),
            self.transform.clone(),
        ))
    }

    pub fn release(&self, conn: PoolConnection) {
        conn.release();
    }

    /// Close `conn` rather than recycling it, e.g. after a failed COMMIT.
    pub fn invalidate(&self, conn: PoolConnection) {
        conn.invalidate();
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    #[must_use]
    pub fn compiler(&self) -> &Arc<Compiler> {
        &self.compiler
    }

    /// Refuse new checkouts and drop idle connections. Checked-out ones close on release.
    pub fn close(&self) {
        debug!("closing connection pool");
        self.pool.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
