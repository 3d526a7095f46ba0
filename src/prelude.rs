//! Convenient imports for common functionality.

pub use crate::client::Client;
pub use crate::compiler::{Compiler, Dialect, PlaceholderStyle};
pub use crate::config::{ClientConfig, PoolConfig, TransformConfig};
pub use crate::connection::{Connection, Connector, RowStream};
pub use crate::error::SqlFxError;
pub use crate::fragment::{
    Compiled, Fragment, Record, Statement, array, array_literal, custom, ident, insert, json, record,
    update,
};
pub use crate::pool::{PoolConnection, PoolStatus};
pub use crate::resolver::{BatchRunner, Resolver, ResolverOptions};
pub use crate::results::{ResultSet, Row};
pub use crate::transaction::Transaction;
pub use crate::transform::{KeyCase, TransformFn};
pub use crate::types::Value;
pub use crate::{record, sql};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteConnector;
