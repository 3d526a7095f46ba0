//! Nested transactions over one pooled connection.
//!
//! Depth 1 is a real `BEGIN`; every nested scope is a savepoint named `sqlfx<n>` where `n`
//! is the depth it was opened at.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::connection::RowStream;
use crate::error::SqlFxError;
use crate::fragment::Statement;
use crate::pool::PoolConnection;
use crate::results::ResultSet;
use crate::types::Value;

fn savepoint_name(level: usize) -> String {
    format!("sqlfx{level}")
}

/// An open transaction. Pass `&mut Transaction` to every operation that should join it.
///
/// Finish it with [`commit`](Self::commit) or [`rollback`](Self::rollback). Dropping it
/// unfinished rolls back on a spawned task and returns the connection to the pool if that
/// succeeds.
pub struct Transaction {
    conn: Option<PoolConnection>,
    depth: usize,
    /// Lowest savepoint level whose scope was dropped mid-flight; 0 when none.
    abandoned: Arc<AtomicUsize>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("depth", &self.depth)
            .field("finished", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

/// Records its savepoint as abandoned unless disarmed.
struct SavepointGuard {
    level: usize,
    slot: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for SavepointGuard {
    fn drop(&mut self) {
        if self.armed {
            let level = self.level;
            let _ = self
                .slot
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current == 0 || level < current).then_some(level)
                });
        }
    }
}

impl Transaction {
    /// Issue `BEGIN` on `conn`. A failed `BEGIN` invalidates the connection.
    pub(crate) async fn begin(mut conn: PoolConnection) -> Result<Self, SqlFxError> {
        let started = conn.connection().begin().await;
        if let Err(err) = started {
            error!(error = %err, "BEGIN failed");
            conn.invalidate();
            return Err(SqlFxError::transaction("begin", err));
        }
        debug!("transaction started");
        Ok(Self {
            conn: Some(conn),
            depth: 1,
            abandoned: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// 1 for the outer transaction, n+1 inside n nested savepoints.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The connection, after rolling back any savepoint whose scope was dropped.
    pub(crate) async fn connection(&mut self) -> Result<&mut PoolConnection, SqlFxError> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            SqlFxError::ConnectionError("transaction is already finished".to_string())
        })?;

        let level = self.abandoned.swap(0, Ordering::AcqRel);
        if level > 0 {
            let name = savepoint_name(level);
            warn!(savepoint = %name, "rolling back abandoned savepoint");
            conn.connection()
                .rollback_to_savepoint(&name)
                .await
                .map_err(|e| SqlFxError::transaction("rollback to savepoint", e))?;
            self.depth = self.depth.min(level);
        }
        Ok(conn)
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError` or the adapter's execution error.
    pub async fn execute(&mut self, statement: &Statement) -> Result<ResultSet, SqlFxError> {
        self.connection().await?.execute(statement).await
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError` or the adapter's execution error.
    pub async fn execute_without_transform(
        &mut self,
        statement: &Statement,
    ) -> Result<ResultSet, SqlFxError> {
        self.connection()
            .await?
            .execute_without_transform(statement)
            .await
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError` or the adapter's execution error.
    pub async fn execute_values(
        &mut self,
        statement: &Statement,
    ) -> Result<Vec<Vec<Value>>, SqlFxError> {
        self.connection().await?.execute_values(statement).await
    }

    /// # Errors
    /// Returns the adapter's execution error.
    pub async fn execute_raw(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, SqlFxError> {
        self.connection().await?.execute_raw(sql, params).await
    }

    /// # Errors
    /// Returns `SqlFxError::Unimplemented` when the adapter cannot stream.
    pub async fn execute_stream(&mut self, statement: &Statement) -> Result<RowStream, SqlFxError> {
        self.connection().await?.execute_stream(statement).await
    }

    /// Run `op` inside a savepoint one level deeper.
    ///
    /// On failure the savepoint is rolled back and the error re-raised; the enclosing
    /// transaction stays usable. If the returned future is dropped before `op` finishes,
    /// the next statement on this transaction rolls back to the savepoint first.
    ///
    /// ```rust,no_run
    /// # use sqlfx::prelude::*;
    /// # async fn demo(tx: &mut Transaction) -> Result<(), SqlFxError> {
    /// let outcome: Result<(), SqlFxError> = tx
    ///     .savepoint(|tx| Box::pin(async move {
    ///         tx.execute(&sql!("DELETE FROM audit").into()).await?;
    ///         Err(SqlFxError::execution("changed my mind"))
    ///     }))
    ///     .await;
    /// assert!(outcome.is_err());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns `op`'s error, or a `SqlFxError::TransactionError` if the savepoint itself
    /// cannot be created or rolled back.
    pub async fn savepoint<T, E, F>(&mut self, op: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>> + Send,
        T: Send,
        E: From<SqlFxError> + Send,
    {
        let level = self.depth;
        let name = savepoint_name(level);
        self.connection()
            .await?
            .connection()
            .savepoint(&name)
            .await
            .map_err(|e| SqlFxError::transaction("savepoint", e))?;
        self.depth = level + 1;
        debug!(savepoint = %name, depth = self.depth, "savepoint created");

        let mut guard = SavepointGuard {
            level,
            slot: Arc::clone(&self.abandoned),
            armed: true,
        };
        let outcome = op(&mut *self).await;
        guard.armed = false;

        // A dropped inner scope is covered if this level rolls back.
        let pending = self.abandoned.swap(0, Ordering::AcqRel);
        self.depth = level;

        match outcome {
            Ok(value) => {
                if pending > 0 {
                    // Still undone: the next statement rolls the abandoned inner scope back.
                    self.abandoned.store(pending, Ordering::Release);
                }
                Ok(value)
            }
            Err(err) => {
                warn!(savepoint = %name, "rolling back to savepoint");
                let conn = self.conn.as_mut().ok_or_else(|| {
                    SqlFxError::ConnectionError("transaction is already finished".to_string())
                })?;
                conn.connection()
                    .rollback_to_savepoint(&name)
                    .await
                    .map_err(|e| {
                        error!(savepoint = %name, error = %e, "ROLLBACK TO SAVEPOINT failed");
                        SqlFxError::transaction("rollback to savepoint", e)
                    })?;
                Err(err)
            }
        }
    }

    /// Commit and return the connection to its pool.
    ///
    /// # Errors
    /// Returns a fatal `SqlFxError::TransactionError`; the connection is invalidated.
    pub async fn commit(mut self) -> Result<(), SqlFxError> {
        let outcome = match self.connection().await {
            Ok(conn) => conn.connection().commit().await,
            Err(err) => Err(err),
        };
        self.finish("commit", outcome)
    }

    /// Roll back and return the connection to its pool.
    ///
    /// # Errors
    /// Returns a fatal `SqlFxError::TransactionError`; the connection is invalidated.
    pub async fn rollback(mut self) -> Result<(), SqlFxError> {
        warn!(depth = self.depth, "rolling back transaction");
        let outcome = match self.conn.as_mut() {
            Some(conn) => conn.connection().rollback().await,
            None => Ok(()),
        };
        self.finish("rollback", outcome)
    }

    fn finish(&mut self, action: &str, outcome: Result<(), SqlFxError>) -> Result<(), SqlFxError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        match outcome {
            Ok(()) => {
                debug!(action, "transaction finished");
                conn.release();
                Ok(())
            }
            Err(err) => {
                error!(action, error = %err, "transaction control failed; invalidating connection");
                conn.invalidate();
                Err(match err {
                    err @ SqlFxError::TransactionError { .. } => err,
                    err => SqlFxError::transaction(action, err),
                })
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        warn!("transaction dropped before commit or rollback; rolling back");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let outcome = conn.connection().rollback().await;
                    match outcome {
                        Ok(()) => conn.release(),
                        Err(err) => {
                            error!(error = %err, "rollback of dropped transaction failed");
                            conn.invalidate();
                        }
                    }
                });
            }
            Err(_) => conn.invalidate(),
        }
    }
}
