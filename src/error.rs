use std::sync::Arc;

use thiserror::Error;

/// Shared driver error attached to [`SqlFxError::ExecutionError`].
pub type DriverError = Arc<dyn std::error::Error + Send + Sync>;

/// Every failure the client core can report.
///
/// The enum is `Clone` so that a single batch failure can be handed to every request that
/// was waiting on that batch.
#[derive(Debug, Clone, Error)]
pub enum SqlFxError {
    /// A fragment could not be compiled. This is a programming error, never retried.
    #[error("Compile error: {0}")]
    CompileError(String),

    /// The database (or the driver talking to it) rejected a statement.
    #[error("SQL execution error: {message}")]
    ExecutionError {
        message: String,
        /// Dialect-specific error code, when the driver exposes one.
        code: Option<String>,
        #[source]
        source: Option<DriverError>,
    },

    /// A positional batch returned a different number of rows than it had requests.
    #[error("Result length mismatch: expected {expected} rows, got {actual}")]
    ResultLengthMismatch { expected: usize, actual: usize },

    /// BEGIN/COMMIT/ROLLBACK/SAVEPOINT failed; the connection state is unknown.
    #[error("Transaction error during {action}: {source}")]
    TransactionError {
        action: String,
        #[source]
        source: Box<SqlFxError>,
    },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    /// A row could not be decoded into the shape a caller asked for.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// A resolver batch ended before delivering a result to this request.
    #[error("Batch aborted: {0}")]
    BatchAborted(String),
}

impl SqlFxError {
    /// Execution error carrying only a message.
    pub fn execution(message: impl Into<String>) -> Self {
        SqlFxError::ExecutionError {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Attach a dialect error code. No-op for non-execution errors.
    #[must_use]
    pub fn with_code(mut self, new_code: impl Into<String>) -> Self {
        if let SqlFxError::ExecutionError { code, .. } = &mut self {
            *code = Some(new_code.into());
        }
        self
    }

    /// Attach the original driver error. No-op for non-execution errors.
    #[must_use]
    pub fn with_source<E>(mut self, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let SqlFxError::ExecutionError { source, .. } = &mut self {
            *source = Some(Arc::new(err));
        }
        self
    }

    pub(crate) fn transaction(action: impl Into<String>, source: SqlFxError) -> Self {
        SqlFxError::TransactionError {
            action: action.into(),
            source: Box::new(source),
        }
    }

    /// Dialect error code of an execution error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            SqlFxError::ExecutionError { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Fatal errors leave a connection in an unknown state and must not be recovered from.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SqlFxError::TransactionError { .. } | SqlFxError::CompileError(_)
        )
    }
}
