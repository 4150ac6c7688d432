//! Recording mock backend
//!
//! Connections record every statement together with the host they were
//! opened on, so routing and transaction tests can assert on what reached
//! which node without a live server. Each connection also gets an id in
//! connect order, which tells apart connections to the same host.
//!
//! Values are escaped ANSI style (quotes doubled), unlike MySQL's
//! backslashes, so tests can see which escaper rendered a literal.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::backends::{Connector, DatabaseConnection, ExecuteResult, Row};
use crate::config::{ConnectionConfig, NodeConfig};
use crate::connection::ConnectionPool;
use crate::database::Database;
use crate::error::{DatabaseError, DbError, DbResult};
use crate::escape::EscapeValue;

/// Everything the mock saw, shared by the backend and its connections
#[derive(Debug, Default)]
pub struct Journal {
    /// Hosts passed to `connect`, failures included
    pub connects: Vec<String>,
    /// `(host, statement)` in execution order
    pub statements: Vec<(String, String)>,
    /// `(connection id, statement)` in execution order
    pub by_connection: Vec<(usize, String)>,
}

impl Journal {
    pub fn statements_on(&self, host: &str) -> Vec<String> {
        self.statements
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn statements_by(&self, connection: usize) -> Vec<String> {
        self.by_connection
            .iter()
            .filter(|(id, _)| *id == connection)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.statements.iter().filter(|(_, s)| s == sql).count()
    }
}

#[derive(Debug, Default)]
pub struct MockBackend {
    journal: Arc<Mutex<Journal>>,
    failing_hosts: HashSet<String>,
    rows: Vec<Row>,
    rows_affected: u64,
    insert_id: Option<u64>,
    reject: Option<Arc<Mutex<Rejection>>>,
}

/// Statements containing `needle` fail, `times` more times or always
#[derive(Debug)]
struct Rejection {
    needle: String,
    times: Option<usize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            rows_affected: 1,
            ..Default::default()
        }
    }

    pub fn failing_host(mut self, host: &str) -> Self {
        self.failing_hosts.insert(host.to_string());
        self
    }

    pub fn with_rows(mut self, rows: Value) -> Self {
        self.rows = match rows {
            Value::Array(rows) => rows
                .into_iter()
                .filter_map(|row| match row {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        self
    }

    pub fn with_result(mut self, rows_affected: u64, insert_id: Option<u64>) -> Self {
        self.rows_affected = rows_affected;
        self.insert_id = insert_id;
        self
    }

    /// Statements containing `needle` fail with an execution error
    pub fn rejecting(mut self, needle: &str) -> Self {
        self.reject = Some(Arc::new(Mutex::new(Rejection {
            needle: needle.to_string(),
            times: None,
        })));
        self
    }

    /// Like [`rejecting`](Self::rejecting), for the first match only
    pub fn rejecting_once(mut self, needle: &str) -> Self {
        self.reject = Some(Arc::new(Mutex::new(Rejection {
            needle: needle.to_string(),
            times: Some(1),
        })));
        self
    }

    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        Arc::clone(&self.journal)
    }
}

impl EscapeValue for MockBackend {
    fn escape_value(&self, raw: &str) -> String {
        format!("'{}'", raw.replace('\'', "''"))
    }
}

#[async_trait]
impl Connector for MockBackend {
    type Connection = MockConnection;

    async fn connect(&self, node: &NodeConfig) -> DbResult<MockConnection> {
        let id = {
            let mut journal = self.journal.lock().unwrap();
            journal.connects.push(node.hostname.clone());
            journal.connects.len() - 1
        };

        if self.failing_hosts.contains(&node.hostname) {
            return Err(DbError::connection(format!("{} refused", node.hostname)));
        }

        Ok(MockConnection {
            id,
            host: node.hostname.clone(),
            journal: Arc::clone(&self.journal),
            rows: self.rows.clone(),
            rows_affected: self.rows_affected,
            insert_id: self.insert_id,
            reject: self.reject.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    /// Position of this connect in [`Journal::connects`]
    pub id: usize,
    pub host: String,
    journal: Arc<Mutex<Journal>>,
    rows: Vec<Row>,
    rows_affected: u64,
    insert_id: Option<u64>,
    reject: Option<Arc<Mutex<Rejection>>>,
}

impl MockConnection {
    fn record(&self, sql: &str) -> DbResult<()> {
        {
            let mut journal = self.journal.lock().unwrap();
            journal.statements.push((self.host.clone(), sql.to_string()));
            journal.by_connection.push((self.id, sql.to_string()));
        }

        let Some(reject) = &self.reject else {
            return Ok(());
        };
        let mut reject = reject.lock().unwrap();
        if !sql.contains(reject.needle.as_str()) || reject.times == Some(0) {
            return Ok(());
        }
        if let Some(times) = reject.times.as_mut() {
            *times -= 1;
        }
        Err(DbError::Execution(Box::new(
            DatabaseError::new(format!("Statement rejected: {}", reject.needle)).with_code("1146"),
        )))
    }
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn execute(&mut self, sql: &str) -> DbResult<ExecuteResult> {
        self.record(sql)?;
        Ok(ExecuteResult {
            rows_affected: self.rows_affected,
            last_insert_id: self.insert_id,
        })
    }

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.record(sql)?;
        Ok(self.rows.clone())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.record("BEGIN")
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.record("COMMIT")
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.record("ROLLBACK")
    }
}

pub fn single_config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .hostname("db0")
        .username("app")
        .password("secret")
        .database("shop")
        .build()
}

/// `hosts` nodes, the first `masters` of them masters
pub fn cluster_config(hosts: &str, masters: usize, rw_separate: bool) -> ConnectionConfig {
    ConnectionConfig::builder()
        .hostname(hosts)
        .username("app")
        .password("secret")
        .database("shop")
        .clustered(masters)
        .rw_separate(rw_separate)
        .build()
}

pub fn database(backend: MockBackend, config: ConnectionConfig) -> Database<MockBackend> {
    let pool = Arc::new(ConnectionPool::new(backend));
    Database::new(pool, Arc::new(config)).unwrap()
}

/// Two drivers over one pool, as two concurrent requests would have
pub fn database_pair(
    backend: MockBackend,
    config: ConnectionConfig,
) -> (Database<MockBackend>, Database<MockBackend>) {
    let pool = Arc::new(ConnectionPool::new(backend));
    let config = Arc::new(config);
    (
        Database::new(Arc::clone(&pool), Arc::clone(&config)).unwrap(),
        Database::new(pool, config).unwrap(),
    )
}
