//! The composition root: a compiler, a pool for plain statements, and a second pool that
//! transactions check out from.

use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::compiler::Compiler;
use crate::config::{ClientConfig, TransformConfig};
use crate::connection::{Connector, RowStream};
use crate::error::SqlFxError;
use crate::executor::QueryTarget;
use crate::fragment::Statement;
use crate::pool::{ConnectionPool, PoolConnection, PoolStatus};
use crate::resolver::BatchRunner;
use crate::results::ResultSet;
use crate::transaction::Transaction;
use crate::types::Value;

struct Inner {
    compiler: Arc<Compiler>,
    pool: ConnectionPool,
    tx_pool: ConnectionPool,
}

/// Cheap to clone; every clone shares the same pools.
///
/// Every execution method takes an `Option<&mut Transaction>`. `None` runs the statement on
/// a connection checked out for just that call; `Some(tx)` runs it on the transaction's
/// connection, after any statement issued on it before.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("compiler", &self.inner.compiler.name())
            .field("pool", &self.inner.pool.status())
            .field("transaction_pool", &self.inner.tx_pool.status())
            .finish()
    }
}

impl Client {
    /// Build a client with the dialect's preset compiler.
    ///
    /// # Errors
    /// Returns `SqlFxError::ConfigError` for invalid pool bounds, or the connector's error
    /// when warm-up connections cannot be opened.
    pub async fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Result<Self, SqlFxError> {
        let compiler = config.dialect.compiler();
        Self::with_compiler(connector, config, compiler).await
    }

    /// Build a client around a caller-configured compiler.
    ///
    /// # Errors
    /// Same as [`Client::new`].
    pub async fn with_compiler(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        compiler: Compiler,
    ) -> Result<Self, SqlFxError> {
        config.validate()?;
        let compiler = Arc::new(compiler);
        let transform = config.transform.map(TransformConfig::into_transform);

        let pool = ConnectionPool::new(
            Arc::clone(&connector),
            &config.pool,
            Arc::clone(&compiler),
            transform.clone(),
        )
        .await?;
        let tx_pool = ConnectionPool::new(
            connector,
            config.effective_transaction_pool(),
            Arc::clone(&compiler),
            transform,
        )
        .await?;
        debug!(dialect = config.dialect.name(), "client ready");

        Ok(Self {
            inner: Arc::new(Inner {
                compiler,
                pool,
                tx_pool,
            }),
        })
    }

    #[must_use]
    pub fn compiler(&self) -> &Compiler {
        &self.inner.compiler
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError`, a pool error, or the adapter's execution error.
    pub async fn execute(
        &self,
        statement: &Statement,
        tx: Option<&mut Transaction>,
    ) -> Result<ResultSet, SqlFxError> {
        let mut target = QueryTarget::resolve(&self.inner.pool, tx).await?;
        target.execute(statement).await
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError`, a pool error, or the adapter's execution error.
    pub async fn execute_without_transform(
        &self,
        statement: &Statement,
        tx: Option<&mut Transaction>,
    ) -> Result<ResultSet, SqlFxError> {
        let mut target = QueryTarget::resolve(&self.inner.pool, tx).await?;
        target.execute_without_transform(statement).await
    }

    /// # Errors
    /// Returns `SqlFxError::CompileError`, a pool error, or the adapter's execution error.
    pub async fn execute_values(
        &self,
        statement: &Statement,
        tx: Option<&mut Transaction>,
    ) -> Result<Vec<Vec<Value>>, SqlFxError> {
        let mut target = QueryTarget::resolve(&self.inner.pool, tx).await?;
        target.execute_values(statement).await
    }

    /// Run SQL text as written; neither the compiler nor the row transform is involved.
    ///
    /// # Errors
    /// Returns a pool error or the adapter's execution error.
    pub async fn execute_raw(
        &self,
        sql: &str,
        params: &[Value],
        tx: Option<&mut Transaction>,
    ) -> Result<ResultSet, SqlFxError> {
        let mut target = QueryTarget::resolve(&self.inner.pool, tx).await?;
        target.execute_raw(sql, params).await
    }

    /// The stream owns its rows, so the pooled connection goes back before it is polled.
    ///
    /// # Errors
    /// Returns `SqlFxError::Unimplemented` when the adapter cannot stream.
    pub async fn execute_stream(
        &self,
        statement: &Statement,
        tx: Option<&mut Transaction>,
    ) -> Result<RowStream, SqlFxError> {
        let mut target = QueryTarget::resolve(&self.inner.pool, tx).await?;
        target.execute_stream(statement).await
    }

    /// Check out a connection from the transaction pool and issue `BEGIN`.
    ///
    /// # Errors
    /// Returns a pool error, or `SqlFxError::TransactionError` when `BEGIN` fails.
    pub async fn begin(&self) -> Result<Transaction, SqlFxError> {
        let conn = self.inner.tx_pool.acquire().await?;
        Transaction::begin(conn).await
    }

    /// Run `op` transactionally.
    ///
    /// Without a context this opens a transaction, commits when `op` succeeds and rolls
    /// back when it fails. With a context it nests `op` in a savepoint of that transaction.
    ///
    /// ```rust,no_run
    /// # use sqlfx::prelude::*;
    /// # async fn demo(client: &Client) -> Result<(), SqlFxError> {
    /// let client = client.clone();
    /// client
    ///     .clone()
    ///     .with_transaction(None, move |tx| Box::pin(async move {
    ///         client.execute(&sql!("INSERT INTO log (msg) VALUES ({})", "outer").into(), Some(&mut *tx)).await?;
    ///         client
    ///             .with_transaction(Some(tx), |tx| Box::pin(async move {
    ///                 tx.execute(&sql!("INSERT INTO log (msg) VALUES ({})", "inner").into()).await?;
    ///                 Ok::<_, SqlFxError>(())
    ///             }))
    ///             .await
    ///     }))
    ///     .await
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns `op`'s error after rolling back, or a fatal `SqlFxError::TransactionError`
    /// when `BEGIN`, `COMMIT` or `ROLLBACK` fails. A failed rollback takes precedence over
    /// `op`'s error and leaves the connection invalidated.
    pub async fn with_transaction<T, E, F>(
        &self,
        ctx: Option<&mut Transaction>,
        op: F,
    ) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>> + Send,
        T: Send,
        E: From<SqlFxError> + Send,
    {
        if let Some(tx) = ctx {
            return tx.savepoint(op).await;
        }

        let mut tx = self.begin().await?;
        match op(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                warn!("transaction body failed");
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    /// A resolver runner that builds one statement per batch and runs it on the pool.
    ///
    /// Batches never join a caller's transaction.
    pub fn batch_runner<I, B>(&self, build: B) -> BatchRunner<I>
    where
        I: Send + 'static,
        B: Fn(Vec<I>) -> Statement + Send + Sync + 'static,
    {
        let client = self.clone();
        Arc::new(move |inputs: Vec<I>| {
            let statement = build(inputs);
            let client = client.clone();
            async move {
                let rows = client.execute(&statement, None).await?;
                Ok::<_, SqlFxError>(rows.into_rows())
            }
            .boxed()
        })
    }

    /// Check out a plain connection for a run of statements outside any transaction.
    ///
    /// # Errors
    /// Returns a pool error.
    pub async fn reserve(&self) -> Result<PoolConnection, SqlFxError> {
        self.inner.pool.acquire().await
    }

    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    #[must_use]
    pub fn transaction_pool_status(&self) -> PoolStatus {
        self.inner.tx_pool.status()
    }

    /// Close both pools. Connections still checked out close when released.
    pub fn close(&self) {
        self.inner.pool.close();
        self.inner.tx_pool.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}
