//! The adapter contract every backend implements.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::SqlFxError;
use crate::results::{ResultSet, Row};
use crate::types::Value;

/// Lazily produced rows.
pub type RowStream = BoxStream<'static, Result<Row, SqlFxError>>;

/// One open database session.
///
/// Only [`query`](Connection::query) is required. The transaction-control methods default
/// to standard SQL text and can be overridden for dialects that spell them differently.
#[async_trait]
pub trait Connection: Send {
    /// Run `sql` with positional `params` and return the rows with their raw column names.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, SqlFxError>;

    /// Rows as value arrays in column order.
    async fn query_values(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, SqlFxError> {
        Ok(self.query(sql, params).await?.into_values())
    }

    async fn query_stream(&mut self, _sql: &str, _params: &[Value]) -> Result<RowStream, SqlFxError> {
        Err(SqlFxError::Unimplemented(
            "this connection does not support streaming".to_string(),
        ))
    }

    async fn begin(&mut self) -> Result<(), SqlFxError> {
        self.query("BEGIN", &[]).await.map(drop)
    }

    async fn commit(&mut self) -> Result<(), SqlFxError> {
        self.query("COMMIT", &[]).await.map(drop)
    }

    async fn rollback(&mut self) -> Result<(), SqlFxError> {
        self.query("ROLLBACK", &[]).await.map(drop)
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), SqlFxError> {
        self.query(&format!("SAVEPOINT {name}"), &[]).await.map(drop)
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SqlFxError> {
        self.query(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
            .await
            .map(drop)
    }

    /// Health check run when an idle connection is handed out again.
    async fn is_valid(&mut self) -> bool {
        true
    }
}

/// Opens new sessions for a pool.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    /// Returns `SqlFxError::ConnectionError` when the session cannot be opened.
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlFxError>;
}
