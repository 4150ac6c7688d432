//! Core Database Backend Traits
//!
//! These traits separate routing from the wire protocol: the pool and router
//! only see a [`Connector`], and the relational driver only talks to a
//! [`DatabaseConnection`].

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::NodeConfig;
use crate::error::DbResult;

/// One result row: field name to scalar, in column order
pub type Row = Map<String, Value>;

/// Outcome of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    /// Auto-increment id generated by the statement, if any
    pub last_insert_id: Option<u64>,
}

/// Opens connections to single nodes.
///
/// Implementations hold no per-connection state; the pool decides when to
/// call [`connect`](Connector::connect) and caches the result per slot.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self, node: &NodeConfig) -> DbResult<Self::Connection>;
}

/// Abstract relational connection.
///
/// Statements arrive fully rendered; transaction control is explicit so
/// the driver can keep its own nesting counter.
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute a write statement
    async fn execute(&mut self, sql: &str) -> DbResult<ExecuteResult>;

    /// Execute a query and return all rows
    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>>;

    /// Execute a query and return the first row
    async fn fetch_optional(&mut self, sql: &str) -> DbResult<Option<Row>> {
        Ok(self.fetch_all(sql).await?.into_iter().next())
    }

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;
}
