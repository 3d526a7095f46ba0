use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use tracing::{debug, warn};

use crate::connection::{Connection, Connector};
use crate::error::SqlFxError;

/// deadpool manager that opens sessions through a [`Connector`] and retires them by age.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    ttl: Option<Duration>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, ttl: Option<Duration>) -> Self {
        Self { connector, ttl }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Manager for ConnectionManager {
    type Type = Box<dyn Connection>;
    type Error = SqlFxError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.connector.connect().await?;
        debug!("opened new connection");
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        if let Some(ttl) = self.ttl {
            let age = metrics.created.elapsed();
            if age >= ttl {
                warn!(?age, ?ttl, "evicting connection past its ttl");
                return Err(RecycleError::Message(
                    format!("connection exceeded ttl of {ttl:?}").into(),
                ));
            }
        }
        if !conn.is_valid().await {
            warn!("evicting connection that failed its health check");
            return Err(RecycleError::Message(
                "connection failed health check".into(),
            ));
        }
        Ok(())
    }
}
