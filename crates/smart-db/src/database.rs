//! Relational driver
//!
//! [`Database`] pairs a [`QueryBuilder`] with a [`ConnectionRouter`]. Fluent
//! calls accumulate state in the builder; every terminal operation takes
//! that state out before rendering, so nothing survives into the next
//! statement whether the call succeeds, fails or only fetches SQL.

use std::sync::Arc;

use rand::rngs::StdRng;
use serde_json::Value;
use tracing::debug;

use crate::backends::{Connector, DatabaseBackendType, DatabaseConnection, ExecuteResult, MySqlBackend, Row};
use crate::config::{ConnectionConfig, RedactedConfig};
use crate::connection::{ConnectionPool, ConnectionRouter, LinkScope, PoolStats, SharedConnection};
use crate::error::{DbError, DbResult};
use crate::escape::EscapeValue;
use crate::query::{JoinType, Logic, QueryBuilder, QueryOptions, Step};
use crate::transaction::TransactionState;

/// Result of a terminal operation: executed data, or the statement text
/// when `fetch_sql` was set
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Data(T),
    Sql(String),
}

impl<T> Fetched<T> {
    pub fn into_data(self) -> Option<T> {
        match self {
            Fetched::Data(data) => Some(data),
            Fetched::Sql(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Fetched<U> {
        match self {
            Fetched::Data(data) => Fetched::Data(f(data)),
            Fetched::Sql(sql) => Fetched::Sql(sql),
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Fetched::Data(_) => None,
            Fetched::Sql(sql) => Some(sql),
        }
    }

    pub fn is_sql(&self) -> bool {
        matches!(self, Fetched::Sql(_))
    }
}

/// Fluent methods that validate their input
macro_rules! forward_fallible {
    ($($(#[$meta:meta])* $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, $($arg: $ty),*) -> DbResult<&mut Self> {
                self.builder.$name($($arg),*)?;
                Ok(self)
            }
        )*
    };
}

/// Fluent methods that cannot fail
macro_rules! forward {
    ($($(#[$meta:meta])* $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, $($arg: $ty),*) -> &mut Self {
                self.builder.$name($($arg),*);
                self
            }
        )*
    };
}

/// Relational driver for one logical request
pub struct Database<B: Connector> {
    builder: QueryBuilder,
    router: ConnectionRouter<B>,
    transaction: TransactionState,
    last_sql: Option<String>,
}

impl Database<MySqlBackend> {
    /// Driver over a fresh MySQL pool
    pub fn mysql(config: ConnectionConfig) -> DbResult<Self> {
        if config.backend_type()? != DatabaseBackendType::MySql {
            return Err(DbError::Configuration(format!(
                "Expected a MySQL configuration, got '{}'",
                config.kind
            )));
        }
        let pool = Arc::new(ConnectionPool::new(MySqlBackend::new()));
        Self::new(pool, Arc::new(config))
    }

    pub fn from_dsn(dsn: &str) -> DbResult<Self> {
        Self::mysql(ConnectionConfig::from_dsn(dsn)?)
    }
}

impl<B> Database<B>
where
    B: Connector + EscapeValue,
    B::Connection: DatabaseConnection,
{
    /// Create a driver over a shared pool. Nothing connects until the first
    /// statement is sent.
    pub fn new(pool: Arc<ConnectionPool<B>>, config: Arc<ConnectionConfig>) -> DbResult<Self> {
        config.validate()?;
        let escaper: Arc<dyn EscapeValue> = pool.backend().clone();

        Ok(Self {
            builder: QueryBuilder::new(escaper),
            router: ConnectionRouter::new(pool, config),
            transaction: TransactionState::new(),
            last_sql: None,
        })
    }

    /// Replace the node selection RNG
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.router = self.router.with_rng(rng);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.router.config()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.router.pool().stats()
    }

    /// Direct access to the pending statement state
    pub fn query_builder(&mut self) -> &mut QueryBuilder {
        &mut self.builder
    }

    /// Fresh builder for `where_exists` / `where_group` arguments
    pub fn sub_query(&self) -> QueryBuilder {
        self.builder.sub_query()
    }

    /// Statement most recently sent to a backend
    pub fn last_sql(&self) -> Option<&str> {
        self.last_sql.as_deref()
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction.depth()
    }

    forward_fallible! {
        table(tables: &str);
        table_strict(tables: &str);
        table_as(tables: &[(&str, &str)]);
        field(fields: &str);
        field_as(fields: &[(&str, &str)]);
        join(table: &str, on: &str, kind: JoinType);
        join_on(table: &str, on: &[&str], kind: JoinType);
        join_many(joins: &[(&str, &str)], kind: JoinType);
        group(fields: &str);
        having(field: &str, op: &str, value: impl Into<Value>);
        having_with(field: &str, op: &str, value: impl Into<Value>, logic: Logic);
        having_batch(rules: &Value);
        order(fields: &[(&str, &str)]);
        order_raw(sql: &str);
        limit_str(limit: &str);
        where_eq(field: &str, value: impl Into<Value>);
        where_op(field: &str, op: &str, value: impl Into<Value>);
        where_or(field: &str, op: &str, value: impl Into<Value>);
        where_with(field: &str, op: &str, value: impl Into<Value>, logic: Logic);
        where_batch(rules: &Value);
        where_batch_with(rules: &Value, logic: Logic);
        where_in(field: &str, values: impl Into<Value>);
        where_not_in(field: &str, values: impl Into<Value>);
        where_like(field: &str, pattern: impl Into<Value>);
        where_not_like(field: &str, pattern: impl Into<Value>);
        where_between(field: &str, range: impl Into<Value>);
        where_not_between(field: &str, range: impl Into<Value>);
        where_null(field: &str);
        where_not_null(field: &str);
        where_exists(query: QueryBuilder);
        where_not_exists(query: QueryBuilder);
        where_group(query: QueryBuilder);
        where_or_group(query: QueryBuilder);
        /// Like `where_op`, but a null or empty value adds nothing
        where_if(field: &str, op: &str, value: impl Into<Value>);
        where_if_batch(rules: &Value);
    }

    forward! {
        field_raw(expr: &str);
        distinct();
        having_raw(sql: &str);
        limit(count: u64);
        limit_offset(offset: u64, count: u64);
        /// Rows of page `page` (1-based), `rows` per page
        page(page: u64, rows: u64);
        lock(lock: bool);
        /// Make the next terminal call return its SQL instead of running it
        fetch_sql(fetch: bool);
        where_raw(sql: &str);
        where_or_raw(sql: &str);
    }

    pub async fn select(&mut self) -> DbResult<Fetched<Vec<Row>>> {
        let options = self.builder.take();
        let sql = options.build_query_sql()?;
        if options.fetch_sql {
            return Ok(Fetched::Sql(sql));
        }
        self.fetch_all(sql).await.map(Fetched::Data)
    }

    pub async fn find(&mut self) -> DbResult<Fetched<Option<Row>>> {
        let options = self.builder.take();
        let sql = options.build_query_sql()?;
        if options.fetch_sql {
            return Ok(Fetched::Sql(sql));
        }
        self.fetch_optional(sql).await.map(Fetched::Data)
    }

    /// First field of the first row; `""` when there is no row
    pub async fn column(&mut self) -> DbResult<Fetched<Value>> {
        let options = self.builder.take();
        self.column_of(options).await
    }

    pub async fn max(&mut self, field: &str) -> DbResult<Fetched<Value>> {
        self.aggregate("max", field).await
    }

    pub async fn min(&mut self, field: &str) -> DbResult<Fetched<Value>> {
        self.aggregate("min", field).await
    }

    pub async fn avg(&mut self, field: &str) -> DbResult<Fetched<Value>> {
        self.aggregate("avg", field).await
    }

    pub async fn sum(&mut self, field: &str) -> DbResult<Fetched<Value>> {
        self.aggregate("sum", field).await
    }

    /// `count(field)`; pass `"*"` to count rows
    pub async fn count(&mut self, field: &str) -> DbResult<Fetched<Value>> {
        self.aggregate("count", field).await
    }

    /// Insert one row (an object) or many rows (a list of objects) and
    /// return the affected row count
    pub async fn insert(&mut self, data: &Value) -> DbResult<Fetched<u64>> {
        let options = self.builder.take();
        let sql = options.build_insert_sql(self.builder.escaper(), data)?;
        self.write(sql, options.fetch_sql)
            .await
            .map(|result| result.map(|r| r.rows_affected))
    }

    /// Insert one row and return its auto-increment id, `None` when nothing
    /// was inserted
    pub async fn insert_get_id(&mut self, data: &Value) -> DbResult<Fetched<Option<u64>>> {
        let options = self.builder.take();
        if !data.is_object() {
            return Err(DbError::InvalidArgument(format!(
                "insert_get_id expects a single row, got {}",
                data
            )));
        }
        let sql = options.build_insert_sql(self.builder.escaper(), data)?;
        self.write(sql, options.fetch_sql).await.map(|result| {
            result.map(|r| if r.rows_affected > 0 { r.last_insert_id } else { None })
        })
    }

    pub async fn update(&mut self, data: &Value) -> DbResult<Fetched<u64>> {
        let options = self.builder.take();
        let sql = options.build_update_sql(self.builder.escaper(), data)?;
        self.write_count(sql, options.fetch_sql).await
    }

    pub async fn increment(&mut self, field: &str, amount: i64) -> DbResult<Fetched<u64>> {
        self.step(field, amount, Step::Increment).await
    }

    pub async fn decrement(&mut self, field: &str, amount: i64) -> DbResult<Fetched<u64>> {
        self.step(field, amount, Step::Decrement).await
    }

    pub async fn delete(&mut self) -> DbResult<Fetched<u64>> {
        let options = self.builder.take();
        let sql = options.build_delete_sql()?;
        self.write_count(sql, options.fetch_sql).await
    }

    pub async fn truncate(&mut self) -> DbResult<Fetched<u64>> {
        let options = self.builder.take();
        let sql = options.build_truncate_sql()?;
        self.write_count(sql, options.fetch_sql).await
    }

    /// Run a raw write statement on the master
    pub async fn execute(&mut self, sql: &str) -> DbResult<Fetched<u64>> {
        let options = self.builder.take();
        self.write_count(sql.to_string(), options.fetch_sql).await
    }

    /// Run a raw read statement on a routed connection
    pub async fn query(&mut self, sql: &str) -> DbResult<Fetched<Vec<Row>>> {
        let options = self.builder.take();
        if options.fetch_sql {
            return Ok(Fetched::Sql(sql.to_string()));
        }
        self.fetch_all(sql.to_string()).await.map(Fetched::Data)
    }

    /// Begin a transaction, or enter one more nesting level.
    ///
    /// The outermost level takes a private master connection out of the
    /// pool, so other drivers sharing the pool never run inside this
    /// transaction. Returns whether `BEGIN` was sent to the backend.
    pub async fn start_trans(&mut self) -> DbResult<bool> {
        if self.transaction.is_active() {
            self.transaction.enter();
            return Ok(false);
        }

        let conn = self.router.dedicate(LinkScope::Write).await?;
        self.transaction.enter();
        let begun = conn.lock().await.begin().await;
        if let Err(err) = begun {
            self.transaction.abandon();
            self.router.release();
            return Err(err.with_statement("BEGIN", &self.redacted()));
        }
        debug!("Transaction started");
        Ok(true)
    }

    /// Leave one nesting level; commits when the outermost level is left
    pub async fn commit(&mut self) -> DbResult<bool> {
        self.finish_trans(true).await
    }

    /// Leave one nesting level; rolls back when the outermost level is left
    pub async fn rollback(&mut self) -> DbResult<bool> {
        self.finish_trans(false).await
    }

    /// Routed connection for the next statement; the master while a
    /// transaction is open
    pub async fn init_connect(&mut self, want_master: bool) -> DbResult<SharedConnection<B::Connection>> {
        self.router
            .init_connect(want_master || self.transaction.is_active())
            .await
    }

    /// The depth only drops once the backend accepted COMMIT or ROLLBACK, so
    /// a failed attempt leaves the transaction open and pinned for a retry.
    async fn finish_trans(&mut self, commit: bool) -> DbResult<bool> {
        if !self.transaction.is_outermost() {
            self.transaction.leave();
            return Ok(false);
        }

        let statement = if commit { "COMMIT" } else { "ROLLBACK" };
        let conn = self.router.init_connect(true).await?;
        let finished = {
            let mut conn = conn.lock().await;
            if commit {
                conn.commit().await
            } else {
                conn.rollback().await
            }
        };
        finished.map_err(|err| err.with_statement(statement, &self.redacted()))?;

        self.transaction.leave();
        self.router.release();
        debug!("Transaction ended with {}", statement);
        Ok(true)
    }

    async fn aggregate(&mut self, func: &str, field: &str) -> DbResult<Fetched<Value>> {
        self.builder.field(&format!("{}({})", func, field))?;
        let options = self.builder.take();
        self.column_of(options).await
    }

    async fn column_of(&mut self, options: QueryOptions) -> DbResult<Fetched<Value>> {
        let sql = options.build_query_sql()?;
        if options.fetch_sql {
            return Ok(Fetched::Sql(sql));
        }
        let row = self.fetch_optional(sql).await?;
        let value = row
            .and_then(|row| row.into_iter().next().map(|(_, value)| value))
            .unwrap_or_else(|| Value::String(String::new()));
        Ok(Fetched::Data(value))
    }

    async fn step(&mut self, field: &str, amount: i64, step: Step) -> DbResult<Fetched<u64>> {
        let options = self.builder.take();
        let sql = options.build_step_sql(field, amount, step)?;
        self.write_count(sql, options.fetch_sql).await
    }

    async fn write_count(&mut self, sql: String, fetch_sql: bool) -> DbResult<Fetched<u64>> {
        self.write(sql, fetch_sql)
            .await
            .map(|result| result.map(|r| r.rows_affected))
    }

    async fn write(&mut self, sql: String, fetch_sql: bool) -> DbResult<Fetched<ExecuteResult>> {
        if fetch_sql {
            return Ok(Fetched::Sql(sql));
        }
        let conn = self.connect_for(&sql, true).await?;
        let mut conn = conn.lock().await;
        let result = conn
            .execute(&sql)
            .await
            .map_err(|err| err.with_statement(&sql, &self.redacted()))?;
        debug!("{} row(s) affected", result.rows_affected);
        Ok(Fetched::Data(result))
    }

    async fn fetch_all(&mut self, sql: String) -> DbResult<Vec<Row>> {
        let conn = self.connect_for(&sql, false).await?;
        let mut conn = conn.lock().await;
        conn.fetch_all(&sql)
            .await
            .map_err(|err| err.with_statement(&sql, &self.redacted()))
    }

    async fn fetch_optional(&mut self, sql: String) -> DbResult<Option<Row>> {
        let conn = self.connect_for(&sql, false).await?;
        let mut conn = conn.lock().await;
        conn.fetch_optional(&sql)
            .await
            .map_err(|err| err.with_statement(&sql, &self.redacted()))
    }

    /// Connect for `sql` and record it as the last statement sent
    async fn connect_for(&mut self, sql: &str, want_master: bool) -> DbResult<SharedConnection<B::Connection>> {
        let conn = self
            .init_connect(want_master)
            .await
            .map_err(|err| err.with_statement(sql, &self.redacted()))?;
        debug!("SQL: {}", sql);
        self.last_sql = Some(sql.to_string());
        Ok(conn)
    }

    fn redacted(&self) -> RedactedConfig {
        self.router.config().redacted()
    }
}

impl<B: Connector> std::fmt::Debug for Database<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("builder", &self.builder)
            .field("router", &self.router)
            .field("transaction", &self.transaction)
            .field("last_sql", &self.last_sql)
            .finish()
    }
}
