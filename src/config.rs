//! Client and pool configuration.
//!
//! Everything here is plain data: it deserializes from JSON (durations in milliseconds) and
//! has `with_*` builders for code-side setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compiler::Dialect;
use crate::error::SqlFxError;
use crate::transform::{KeyCase, TransformFn, key_case};

/// Bounds and recycling policy of one connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened eagerly when the pool is built.
    pub min_size: usize,
    pub max_size: usize,
    /// Idle connections older than this are discarded at acquire time.
    #[serde(with = "duration_ms::option", rename = "ttl_ms")]
    pub ttl: Option<Duration>,
    /// Give up waiting for a free connection after this long. `None` waits forever.
    #[serde(with = "duration_ms::option", rename = "acquire_timeout_ms")]
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            ttl: None,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// # Errors
    /// Returns `SqlFxError::ConfigError` when `max_size` is zero or below `min_size`.
    pub fn validate(&self) -> Result<(), SqlFxError> {
        if self.max_size == 0 {
            return Err(SqlFxError::ConfigError(
                "pool max_size must be at least 1".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(SqlFxError::ConfigError(format!(
                "pool min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Built-in key-case transform settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub case: KeyCase,
    /// Only rename column names, leave JSON values untouched.
    #[serde(default)]
    pub shallow: bool,
}

impl TransformConfig {
    #[must_use]
    pub fn into_transform(self) -> TransformFn {
        key_case(self.case, self.shallow)
    }
}

/// Everything a [`Client`](crate::client::Client) needs besides its connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub dialect: Dialect,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Pool used for transactions. Defaults to a copy of `pool`.
    #[serde(default)]
    pub transaction_pool: Option<PoolConfig>,
    #[serde(default)]
    pub transform: Option<TransformConfig>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            pool: PoolConfig::default(),
            transaction_pool: None,
            transform: None,
        }
    }

    /// # Errors
    /// Returns `SqlFxError::ConfigError` for malformed JSON or invalid pool bounds.
    pub fn from_json(json: &str) -> Result<Self, SqlFxError> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| SqlFxError::ConfigError(format!("invalid client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_transaction_pool(mut self, pool: PoolConfig) -> Self {
        self.transaction_pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, case: KeyCase, shallow: bool) -> Self {
        self.transform = Some(TransformConfig { case, shallow });
        self
    }

    /// # Errors
    /// Returns `SqlFxError::ConfigError` when either pool config is invalid.
    pub fn validate(&self) -> Result<(), SqlFxError> {
        self.pool.validate()?;
        if let Some(tx_pool) = &self.transaction_pool {
            tx_pool.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn effective_transaction_pool(&self) -> &PoolConfig {
        self.transaction_pool.as_ref().unwrap_or(&self.pool)
    }
}

/// `Option<Duration>` as integer milliseconds.
mod duration_ms {
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => {
                    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                    serializer.serialize_some(&millis)
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
