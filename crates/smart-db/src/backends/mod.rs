//! Database Backend Abstractions
//!
//! A backend is a [`Connector`] that opens connections for one node; SQL
//! backends also provide [`EscapeValue`](crate::escape::EscapeValue) so
//! statements can be rendered without a live connection.

pub mod core;
pub mod mysql;

pub use self::core::*;
pub use mysql::{MySqlBackend, MySqlConnection};

use crate::error::DbError;

/// Backend kinds accepted in the `type` configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    MySql,
    Redis,
}

impl DatabaseBackendType {
    /// Port used when the configuration does not name one
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseBackendType::MySql => 3306,
            DatabaseBackendType::Redis => 6379,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::MySql => write!(f, "mysql"),
            DatabaseBackendType::Redis => write!(f, "redis"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySql),
            "redis" => Ok(DatabaseBackendType::Redis),
            _ => Err(DbError::Configuration(format!("Unsupported database backend: {}", s))),
        }
    }
}
