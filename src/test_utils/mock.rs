use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::connection::{Connection, Connector, RowStream};
use crate::error::SqlFxError;
use crate::results::ResultSet;
use crate::types::Value;

/// One statement as a [`MockConnection`] received it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedStatement {
    pub connection_id: usize,
    pub sql: String,
    pub params: Vec<Value>,
}

type Handler = Arc<dyn Fn(&[Value]) -> Result<ResultSet, SqlFxError> + Send + Sync>;

struct Rule {
    pattern: String,
    handler: Handler,
}

#[derive(Default)]
struct MockState {
    log: Mutex<Vec<LoggedStatement>>,
    rules: Mutex<Vec<Rule>>,
    delay: Mutex<Option<Duration>>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    open: AtomicUsize,
    peak: AtomicUsize,
    refuse_connections: AtomicBool,
    unhealthy: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Scriptable in-memory [`Connector`].
///
/// Every statement is logged with the id of the connection that ran it. Replies are chosen
/// by SQL substring, most recently added rule first; unmatched statements return an empty
/// result set. Connection ids start at 1.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnector")
            .field("created", &self.created())
            .field("open", &self.open())
            .finish_non_exhaustive()
    }
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `result` for statements containing `pattern`.
    pub fn respond_with(&self, pattern: &str, result: ResultSet) -> &Self {
        self.handle(pattern, move |_| Ok(result.clone()))
    }

    /// Fail statements containing `pattern` with an execution error.
    pub fn fail_on(&self, pattern: &str, message: &str) -> &Self {
        let message = message.to_string();
        self.handle(pattern, move |_| Err(SqlFxError::execution(message.clone())))
    }

    /// Compute the reply from the bound parameters.
    pub fn handle<F>(&self, pattern: &str, handler: F) -> &Self
    where
        F: Fn(&[Value]) -> Result<ResultSet, SqlFxError> + Send + Sync + 'static,
    {
        lock(&self.state.rules).push(Rule {
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn clear_rules(&self) {
        lock(&self.state.rules).clear();
    }

    /// Sleep this long before answering each statement.
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *lock(&self.state.delay) = Some(delay);
        self
    }

    /// Make `connect` fail until reset.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Make `is_valid` report false for every connection.
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.state.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sql_log(&self) -> Vec<LoggedStatement> {
        lock(&self.state.log).clone()
    }

    /// SQL text of every logged statement, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state.log)
            .iter()
            .map(|entry| entry.sql.clone())
            .collect()
    }

    /// How many logged statements contain `pattern`.
    #[must_use]
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.state.log)
            .iter()
            .filter(|entry| entry.sql.contains(pattern))
            .count()
    }

    pub fn clear_log(&self) {
        lock(&self.state.log).clear();
    }

    /// Connections opened so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Connections currently alive.
    #[must_use]
    pub fn open(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously alive connections.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlFxError> {
        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(SqlFxError::ConnectionError(
                "mock connector refused the connection".to_string(),
            ));
        }
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.created.fetch_add(1, Ordering::SeqCst);
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session produced by [`MockConnector`].
pub struct MockConnection {
    id: usize,
    state: Arc<MockState>,
}

impl MockConnection {
    fn reply(&self, sql: &str, params: &[Value]) -> Result<ResultSet, SqlFxError> {
        lock(&self.state.log).push(LoggedStatement {
            connection_id: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        let handler = lock(&self.state.rules)
            .iter()
            .rev()
            .find(|rule| sql.contains(&rule.pattern))
            .map(|rule| Arc::clone(&rule.handler));
        match handler {
            Some(handler) => handler(params),
            None => Ok(ResultSet::default()),
        }
    }

    async fn pause(&self) {
        let delay = *lock(&self.state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, SqlFxError> {
        self.pause().await;
        self.reply(sql, params)
    }

    async fn query_stream(&mut self, sql: &str, params: &[Value]) -> Result<RowStream, SqlFxError> {
        self.pause().await;
        let rows = self.reply(sql, params)?.into_rows();
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }

    async fn is_valid(&mut self) -> bool {
        !self.state.unhealthy.load(Ordering::SeqCst)
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}
