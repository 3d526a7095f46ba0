use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Mutex;

use super::params::Params;
use super::query;
use crate::connection::{Connection, RowStream};
use crate::error::SqlFxError;
use crate::results::ResultSet;
use crate::types::Value;

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// One rusqlite session. Every call runs on tokio's blocking pool.
pub struct SqliteConnection {
    conn: SharedSqliteConnection,
}

impl SqliteConnection {
    pub(crate) fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, SqlFxError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlFxError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlFxError::execution(format!("sqlite spawn_blocking join error: {e}")))?
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, SqlFxError> {
        let sql = sql.to_string();
        let params = Params::convert(params);
        run_blocking(Arc::clone(&self.conn), move |conn| {
            query::run(conn, &sql, &params.0)
        })
        .await
    }

    /// Rows are read eagerly on the blocking pool, then yielded one by one.
    async fn query_stream(&mut self, sql: &str, params: &[Value]) -> Result<RowStream, SqlFxError> {
        let rows = self.query(sql, params).await?.into_rows();
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }

    async fn is_valid(&mut self) -> bool {
        run_blocking(Arc::clone(&self.conn), |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(query::map_sqlite_error)
        })
        .await
        .is_ok()
    }
}
