//! Redis backend
//!
//! One multiplexing-free async connection per pool slot. The node's
//! `database` entry is the logical database number.

use async_trait::async_trait;
use redis::{Client, ConnectionAddr, ConnectionInfo, ErrorKind, RedisConnectionInfo, RedisError};
use smart_db::{Connector, DatabaseError, DbError, DbResult, NodeConfig};
use tracing::info;

use crate::driver::CommandConnection;

/// Redis key-value backend
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisBackend;

impl RedisBackend {
    pub fn new() -> Self {
        Self
    }

    /// Client connection parameters for one node
    pub fn connection_info(&self, node: &NodeConfig) -> DbResult<ConnectionInfo> {
        let db = match node.database.trim() {
            "" => 0,
            db => db.parse::<i64>().map_err(|_| {
                DbError::Configuration(format!("Redis database must be a number, got '{}'", db))
            })?,
        };

        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(node.hostname.clone(), node.hostport),
            redis: RedisConnectionInfo {
                db,
                username: non_empty(&node.username),
                password: non_empty(&node.password),
            },
        })
    }
}

#[async_trait]
impl Connector for RedisBackend {
    type Connection = RedisConnection;

    async fn connect(&self, node: &NodeConfig) -> DbResult<RedisConnection> {
        let client = Client::open(self.connection_info(node)?).map_err(map_redis_error)?;

        let conn = match node.timeout {
            Some(timeout) => tokio::time::timeout(timeout, client.get_async_connection())
                .await
                .map_err(|_| {
                    DbError::connection(format!(
                        "Timed out after {:?} connecting to {}",
                        timeout,
                        node.address()
                    ))
                })?
                .map_err(map_redis_error)?,
            None => client.get_async_connection().await.map_err(map_redis_error)?,
        };

        info!("Connected to Redis at {}", node.address());
        Ok(RedisConnection { conn })
    }
}

/// Redis connection implementation
pub struct RedisConnection {
    conn: redis::aio::Connection,
}

#[async_trait]
impl CommandConnection for RedisConnection {
    async fn call(&mut self, cmd: &redis::Cmd) -> DbResult<redis::Value> {
        cmd.query_async(&mut self.conn).await.map_err(map_redis_error)
    }
}

/// Classify a client error: transport and authentication failures are
/// connection errors, everything the server replied with is an execution
/// error carrying the server's error code.
pub fn map_redis_error(err: RedisError) -> DbError {
    let transport = matches!(err.kind(), ErrorKind::IoError | ErrorKind::AuthenticationFailed)
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal();
    if transport {
        return DbError::connection(err.to_string());
    }

    let mut database_error = DatabaseError::new(err.to_string());
    if let Some(code) = err.code() {
        database_error = database_error.with_code(code);
    }
    DbError::Execution(Box::new(database_error))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
