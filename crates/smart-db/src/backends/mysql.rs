//! MySQL Backend Implementation
//!
//! Uses a single `sqlx` connection per node. Statements carry their values
//! inline and are sent without arguments, so they go over the text protocol
//! and every column is decoded from its textual form.

use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, ConnectOptions, Executor, Row as _, TypeInfo};
use tracing::{debug, info};

use super::core::*;
use crate::config::NodeConfig;
use crate::error::{DbError, DbResult};
use crate::escape::{EscapeValue, MySqlEscaper};

/// MySQL database backend
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBackend;

impl MySqlBackend {
    pub fn new() -> Self {
        Self
    }

    /// Build connect options for one node
    pub fn connect_options(&self, node: &NodeConfig) -> DbResult<MySqlConnectOptions> {
        let mut options = MySqlConnectOptions::new()
            .host(&node.hostname)
            .port(node.hostport)
            .charset(&node.charset);

        if !node.username.is_empty() {
            options = options.username(&node.username);
        }
        if !node.password.is_empty() {
            options = options.password(&node.password);
        }
        if !node.database.is_empty() {
            options = options.database(&node.database);
        }

        let ssl_mode = node
            .params
            .get("ssl-mode")
            .or_else(|| node.params.get("sslmode"));
        if let Some(mode) = ssl_mode {
            let mode: MySqlSslMode = mode
                .parse()
                .map_err(|_| DbError::Configuration(format!("Invalid ssl-mode '{}'", mode)))?;
            options = options.ssl_mode(mode);
        }
        if let Some(collation) = node.params.get("collation") {
            options = options.collation(collation);
        }

        Ok(options)
    }
}

impl EscapeValue for MySqlBackend {
    fn escape_value(&self, raw: &str) -> String {
        MySqlEscaper.escape_value(raw)
    }
}

#[async_trait]
impl Connector for MySqlBackend {
    type Connection = MySqlConnection;

    async fn connect(&self, node: &NodeConfig) -> DbResult<MySqlConnection> {
        let options = self.connect_options(node)?;

        let conn = match node.timeout {
            Some(timeout) => tokio::time::timeout(timeout, options.connect())
                .await
                .map_err(|_| {
                    DbError::connection(format!(
                        "Timed out after {:?} connecting to {}",
                        timeout,
                        node.address()
                    ))
                })??,
            None => options.connect().await?,
        };

        info!("Connected to MySQL at {}", node.address());
        Ok(MySqlConnection::new(conn))
    }
}

/// MySQL connection implementation
pub struct MySqlConnection {
    conn: sqlx::MySqlConnection,
}

impl MySqlConnection {
    pub fn new(conn: sqlx::MySqlConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    async fn execute(&mut self, sql: &str) -> DbResult<ExecuteResult> {
        let result = self.conn.execute(sql).await?;
        let last_insert_id = match result.last_insert_id() {
            0 => None,
            id => Some(id),
        };

        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let rows = self.conn.fetch_all(sql).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_optional(&mut self, sql: &str) -> DbResult<Option<Row>> {
        let row = self.conn.fetch_optional(sql).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn begin(&mut self) -> DbResult<()> {
        debug!("START TRANSACTION");
        self.conn.execute("START TRANSACTION").await?;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        debug!("COMMIT");
        self.conn.execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        debug!("ROLLBACK");
        self.conn.execute("ROLLBACK").await?;
        Ok(())
    }
}

/// Convert a MySQL row to an ordered field map
fn decode_row(row: &MySqlRow) -> DbResult<Row> {
    let mut map = Row::with_capacity(row.len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

/// Convert one column to JSON; integers and floats keep their numeric type
fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> DbResult<Value> {
    let value = match type_name {
        "NULL" => None,
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get_unchecked::<Option<i64>, _>(index)?
            .map(Value::from),
        name if name.ends_with("UNSIGNED") => row
            .try_get_unchecked::<Option<u64>, _>(index)?
            .map(Value::from),
        "FLOAT" | "DOUBLE" => row
            .try_get_unchecked::<Option<f64>, _>(index)?
            .and_then(Number::from_f64)
            .map(Value::Number),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        // DECIMAL, dates, times, JSON and text types keep their textual form
        _ => row
            .try_get_unchecked::<Option<String>, _>(index)?
            .map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}
