//! Error types for the data-access layer
//!
//! Argument-shape errors (`InvalidIdentifier`, `InvalidArgument`,
//! `UnsupportedOperator`, `UnsupportedCommand`) are raised while a statement
//! is being built, before any connection is touched. `Connection` and
//! `Execution` only come out of real I/O and carry enough context to be
//! logged as-is.

use std::fmt;

use crate::config::RedactedConfig;

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for query building, routing and execution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbError {
    /// Table or column name outside the identifier grammar
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Wrong operand shape or type for an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operator not understood by the condition compiler
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Command missing from the key-value classification table
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    /// Every configured node for the request failed to connect
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        config: Option<RedactedConfig>,
    },

    /// The backend received the statement and rejected it
    #[error("{0}")]
    Execution(Box<DatabaseError>),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DbError {
    /// Backend rejection without statement context yet
    pub fn execution<S: Into<String>>(message: S) -> Self {
        DbError::Execution(Box::new(DatabaseError::new(message)))
    }

    /// Connection failure without node context yet
    pub fn connection<S: Into<String>>(message: S) -> Self {
        DbError::Connection {
            message: message.into(),
            config: None,
        }
    }

    /// Attach the offending statement and the redacted configuration.
    ///
    /// Only `Execution` and `Connection` errors carry context; every other
    /// variant is returned unchanged.
    pub fn with_statement(self, sql: &str, config: &RedactedConfig) -> Self {
        match self {
            DbError::Execution(mut err) => {
                if err.sql.is_none() {
                    err.sql = Some(sql.to_string());
                }
                if err.config.is_none() {
                    err.config = Some(config.clone());
                }
                DbError::Execution(err)
            }
            DbError::Connection { message, config: None } => DbError::Connection {
                message,
                config: Some(config.clone()),
            },
            other => other,
        }
    }

    /// Whether the error was raised before any backend round-trip
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            DbError::InvalidIdentifier(_)
                | DbError::InvalidArgument(_)
                | DbError::UnsupportedOperator(_)
                | DbError::UnsupportedCommand(_)
        )
    }
}

/// Structured backend error
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseError {
    pub message: String,
    /// Driver-specific error number
    pub code: Option<String>,
    pub sql_state: Option<String>,
    /// Statement that was sent when the error occurred
    pub sql: Option<String>,
    /// Connection configuration with credentials stripped
    pub config: Option<RedactedConfig>,
}

impl DatabaseError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            code: None,
            sql_state: None,
            sql: None,
            config: None,
        }
    }

    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_sql_state<S: Into<String>>(mut self, sql_state: S) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database error")?;
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, " (SQL: {})", sql)?;
        }
        Ok(())
    }
}

impl std::error::Error for DatabaseError {}

// Convert from sqlx errors
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let mut error = DatabaseError::new(db_err.message());
                if let Some(mysql) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    error = error.with_code(mysql.number().to_string());
                }
                if let Some(state) = db_err.code() {
                    error = error.with_sql_state(state.to_string());
                }
                DbError::Execution(Box::new(error))
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::connection(err.to_string()),
            sqlx::Error::Configuration(_) => DbError::Configuration(err.to_string()),
            other => DbError::execution(other.to_string()),
        }
    }
}
