use std::ops::{Deref, DerefMut};

use crate::error::SqlFxError;
use crate::pool::{ConnectionPool, PoolConnection};
use crate::transaction::Transaction;

/// Where a client operation runs: a fresh checkout from the pool, or the connection of
/// the transaction the caller passed in.
pub(crate) enum QueryTarget<'a> {
    Pooled(PoolConnection),
    Transaction(&'a mut PoolConnection),
}

impl<'a> QueryTarget<'a> {
    /// Resolve `tx` to its connection, or acquire one from `pool` when there is none.
    pub(crate) async fn resolve(
        pool: &ConnectionPool,
        tx: Option<&'a mut Transaction>,
    ) -> Result<QueryTarget<'a>, SqlFxError> {
        match tx {
            Some(tx) => Ok(QueryTarget::Transaction(tx.connection().await?)),
            None => Ok(QueryTarget::Pooled(pool.acquire().await?)),
        }
    }
}

impl Deref for QueryTarget<'_> {
    type Target = PoolConnection;

    fn deref(&self) -> &PoolConnection {
        match self {
            QueryTarget::Pooled(conn) => conn,
            QueryTarget::Transaction(conn) => conn,
        }
    }
}

impl DerefMut for QueryTarget<'_> {
    fn deref_mut(&mut self) -> &mut PoolConnection {
        match self {
            QueryTarget::Pooled(conn) => conn,
            QueryTarget::Transaction(conn) => conn,
        }
    }
}
