use std::fmt;
use std::sync::Arc;

use deadpool::managed::Object;
use tracing::debug;

use super::manager::ConnectionManager;
use crate::compiler::Compiler;
use crate::connection::{Connection, RowStream};
use crate::error::SqlFxError;
use crate::fragment::Statement;
use crate::results::ResultSet;
use crate::transform::TransformFn;
use crate::types::Value;

/// A checked-out session plus the compiler and row transform it executes with.
///
/// Dropping it returns the session to its pool; [`invalidate`](Self::invalidate) closes it
/// instead.
pub struct PoolConnection {
    conn: Object<ConnectionManager>,
    compiler: Arc<Compiler>,
    transform: Option<TransformFn>,
}

impl fmt::Debug for PoolConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("compiler", &self.compiler.name())
            .field("transform", &self.transform.is_some())
            .finish_non_exhaustive()
    }
}

impl PoolConnection {
    pub(crate) fn new(
        conn: Object<ConnectionManager>,
        compiler: Arc<Compiler>,
        transform: Option<TransformFn>,
    ) -> Self {
        Self {
            conn,
            compiler,
            transform,
        }
    }

    #[must_use]
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// The underlying adapter session.
    pub fn connection(&mut self) -> &mut dyn Connection {
        &mut **self.conn
    }

    /// Compile (or reuse the cached compile of) `statement`, run it, apply the row transform.
    ///
    /// # Errors
    /// Returns `SqlFxError::CompileError` or the adapter's execution error.
    pub async fn execute(&mut self, statement: &Statement) -> Result<ResultSet, SqlFxError> {
        let result_set = self.execute_without_transform(statement).await?;
        Ok(match &self.transform {
            Some(transform) => transform(result_set),
            None => result_set,
        })
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError` or the adapter's execution error.
    pub async fn execute_without_transform(
        &mut self,
        statement: &Statement,
    ) -> Result<ResultSet, SqlFxError> {
        let compiled = statement.compile(&self.compiler)?;
        debug!(sql = %compiled.sql, params = compiled.params.len(), "execute");
        self.conn.query(&compiled.sql, &compiled.params).await
    }

    /// Rows as value arrays; no transform, since there are no keys to rename.
    ///
    /// # Errors
    /// Returns `SqlFxError::CompileError` or the adapter's execution error.
    pub async fn execute_values(
        &mut self,
        statement: &Statement,
    ) -> Result<Vec<Vec<Value>>, SqlFxError> {
        let compiled = statement.compile(&self.compiler)?;
        debug!(sql = %compiled.sql, params = compiled.params.len(), "execute values");
        self.conn.query_values(&compiled.sql, &compiled.params).await
    }

    /// Run SQL text as-is, bypassing the compiler and the row transform.
    ///
    /// # Errors
    /// Returns the adapter's execution error.
    pub async fn execute_raw(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, SqlFxError> {
        debug!(sql, params = params.len(), "execute raw");
        self.conn.query(sql, params).await
    }

    /// Lazily yielded rows with raw column names.
    ///
    /// # Errors
    /// Returns `SqlFxError::Unimplemented` when the adapter cannot stream.
    pub async fn execute_stream(&mut self, statement: &Statement) -> Result<RowStream, SqlFxError> {
        let compiled = statement.compile(&self.compiler)?;
        debug!(sql = %compiled.sql, params = compiled.params.len(), "execute stream");
        self.conn.query_stream(&compiled.sql, &compiled.params).await
    }

    /// Hand the session back to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Close the session instead of returning it to the pool.
    pub fn invalidate(self) {
        debug!("invalidating connection");
        drop(Object::take(self.conn));
    }
}
