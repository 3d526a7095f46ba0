//! Test doubles for code built on this crate.

mod mock;

pub use mock::{LoggedStatement, MockConnection, MockConnector};
