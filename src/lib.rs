//! Dialect-agnostic SQL client core.
//!
//! Queries are built as [`Fragment`](fragment::Fragment)s, compiled by a
//! [`Compiler`](compiler::Compiler) into dialect-specific text and parameters, and executed
//! through a [`Client`](client::Client) that owns the connection pools, nests transactions
//! with savepoints, and feeds batched [`Resolver`](resolver::Resolver)s.

pub mod client;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod pool;
pub mod prelude;
pub mod resolver;
pub mod results;
pub mod transaction;
pub mod transform;
pub mod types;

mod executor;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::Client;
pub use error::SqlFxError;
pub use fragment::{Fragment, Statement};
pub use types::Value;
