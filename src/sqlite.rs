//! rusqlite-backed adapter.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sqlfx::prelude::*;
//! use sqlfx::sqlite::SqliteConnector;
//!
//! # async fn demo() -> Result<(), SqlFxError> {
//! let connector = Arc::new(SqliteConnector::new("app.db"));
//! let client = Client::new(connector, ClientConfig::new(Dialect::Sqlite)).await?;
//! client
//!     .execute(&sql!("CREATE TABLE IF NOT EXISTS t (id INTEGER)").into(), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod params;
mod query;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

pub use connection::SqliteConnection;
pub use params::{from_sqlite_value, to_sqlite_value};

use crate::connection::{Connection, Connector};
use crate::error::SqlFxError;

const MEMORY_PATH: &str = ":memory:";

/// Opens rusqlite sessions on one database file.
///
/// File databases are switched to WAL so readers on other pooled connections do not block
/// the writer. `:memory:` gives every connection its own private database.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
    busy_timeout: Duration,
}

impl SqliteConnector {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    /// How long a statement waits on a locked database before failing with `SQLITE_BUSY`.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlFxError> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let conn = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path)?;
            conn.busy_timeout(busy_timeout)?;
            if path != MEMORY_PATH {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok::<_, rusqlite::Error>(conn)
        })
        .await
        .map_err(|e| SqlFxError::ConnectionError(format!("sqlite spawn_blocking join error: {e}")))?
        .map_err(|e| SqlFxError::ConnectionError(format!("failed to open {}: {e}", self.path)))?;

        debug!(path = %self.path, "sqlite connection opened");
        Ok(Box::new(SqliteConnection::new(conn)))
    }
}
