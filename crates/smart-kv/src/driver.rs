//! Key-value driver
//!
//! Commands are resolved against the classification table before any
//! connection is opened, then sent on a read or write link picked by the
//! shared [`ConnectionRouter`].
//!
//! `select` and the commands that bind a session (`MULTI`, `WATCH`, `AUTH`)
//! move the driver onto private connections, so a switched database or an
//! open `MULTI` block never reaches other drivers on the same pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use redis::{FromRedisValue, ToRedisArgs};
use smart_db::{
    ConnectionConfig, ConnectionPool, ConnectionRouter, Connector, DatabaseBackendType, DbError, DbResult, Deploy,
    LinkScope, PoolStats, SharedConnection,
};
use tracing::debug;

use crate::backends::{map_redis_error, RedisBackend};
use crate::commands::{lookup, Access, CommandSpec};

/// Argument list for commands that take none
pub const NO_ARGS: &[&str] = &[];

/// A connection that can run one packed command
#[async_trait]
pub trait CommandConnection: Send {
    async fn call(&mut self, cmd: &redis::Cmd) -> DbResult<redis::Value>;
}

/// Key-value driver for one logical request
pub struct KeyValue<B: Connector> {
    router: ConnectionRouter<B>,
}

impl KeyValue<RedisBackend> {
    /// Driver over a fresh Redis pool
    pub fn redis(config: ConnectionConfig) -> DbResult<Self> {
        if config.backend_type()? != DatabaseBackendType::Redis {
            return Err(DbError::Configuration(format!(
                "Expected a Redis configuration, got '{}'",
                config.kind
            )));
        }
        let pool = Arc::new(ConnectionPool::new(RedisBackend::new()));
        Self::new(pool, Arc::new(config))
    }

    pub fn from_dsn(dsn: &str) -> DbResult<Self> {
        Self::redis(ConnectionConfig::from_dsn(dsn)?)
    }
}

impl<B> KeyValue<B>
where
    B: Connector,
    B::Connection: CommandConnection,
{
    pub fn new(pool: Arc<ConnectionPool<B>>, config: Arc<ConnectionConfig>) -> DbResult<Self> {
        config.validate()?;
        if config.persistent {
            debug!("Persistent connections requested; pooled connections already live as long as the pool");
        }
        Ok(Self {
            router: ConnectionRouter::new(pool, config),
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

    /// Default key lifetime from the configuration
    pub fn default_expire(&self) -> Duration {
        Duration::from_secs(self.router.config().expire)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.router.pool().stats()
    }

    /// Run `command` with `args` and return the raw reply.
    ///
    /// Unknown commands fail with [`DbError::UnsupportedCommand`] before
    /// any connection is opened.
    ///
    /// ```no_run
    /// # async fn demo(kv: &mut smart_kv::KeyValue<smart_kv::RedisBackend>) -> smart_db::DbResult<()> {
    /// kv.execute("set", ("greeting", "hello")).await?;
    /// kv.execute("expire", ("greeting", 60)).await?;
    /// let size = kv.execute("dbsize", smart_kv::NO_ARGS).await?;
    /// # let _ = size;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<A: ToRedisArgs>(&mut self, command: &str, args: A) -> DbResult<redis::Value> {
        let spec = lookup(command)?;
        let mut cmd = redis::cmd(spec.name);
        cmd.arg(args);

        let conn = if spec.binds_session() {
            self.router.dedicate(LinkScope::Both).await?
        } else {
            self.router.init_connect(spec.access.is_write()).await?
        };
        self.call(&conn, spec, &cmd).await
    }

    /// [`execute`](Self::execute) with the reply converted to `T`
    pub async fn execute_as<T, A>(&mut self, command: &str, args: A) -> DbResult<T>
    where
        T: FromRedisValue,
        A: ToRedisArgs,
    {
        let value = self.execute(command, args).await?;
        T::from_redis_value(&value).map_err(map_redis_error)
    }

    /// Switch the logical database on the write link, and on the read link
    /// too when reads are separated from writes.
    ///
    /// Both links become private to this driver first. Without read/write
    /// separation reads follow the write link, so they see the same database.
    pub async fn select(&mut self, db: i64) -> DbResult<&mut Self> {
        let config = self.router.config();
        let separated = config.deploy == Deploy::Clustered && config.rw_separate;

        let spec = CommandSpec {
            name: "SELECT",
            access: Access::Write,
        };
        let mut cmd = redis::cmd(spec.name);
        cmd.arg(db);

        if separated {
            let read = self.router.dedicate(LinkScope::Read).await?;
            self.call(&read, spec, &cmd).await?;
            let write = self.router.dedicate(LinkScope::Write).await?;
            self.call(&write, spec, &cmd).await?;
        } else {
            let conn = self.router.dedicate(LinkScope::Both).await?;
            self.call(&conn, spec, &cmd).await?;
        }

        Ok(self)
    }

    /// Drop private connections taken by `select` or a session command and
    /// go back to the pool's shared ones; returns whether any was held
    pub fn reset_session(&mut self) -> bool {
        self.router.release()
    }

    async fn call(
        &self,
        conn: &SharedConnection<B::Connection>,
        spec: CommandSpec,
        cmd: &redis::Cmd,
    ) -> DbResult<redis::Value> {
        debug!("{} ({:?})", spec.name, spec.access);
        let mut conn = conn.lock().await;
        conn.call(cmd)
            .await
            .map_err(|err| err.with_statement(spec.name, &self.router.config().redacted()))
    }
}

impl<B: Connector> fmt::Debug for KeyValue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValue")
            .field("router", &self.router)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use rand::SeedableRng;
    use smart_db::NodeConfig;

    use super::*;

    /// `(host, connection id, packed command)`
    type Sent = Arc<Mutex<Vec<(String, usize, Vec<u8>)>>>;

    #[derive(Default)]
    struct MockBackend {
        connects: Arc<Mutex<Vec<String>>>,
        sent: Sent,
        failing_hosts: HashSet<String>,
    }

    struct MockConnection {
        host: String,
        id: usize,
        sent: Sent,
    }

    #[async_trait]
    impl Connector for MockBackend {
        type Connection = MockConnection;

        async fn connect(&self, node: &NodeConfig) -> DbResult<MockConnection> {
            let id = {
                let mut connects = self.connects.lock().unwrap();
                connects.push(node.hostname.clone());
                connects.len() - 1
            };
            if self.failing_hosts.contains(&node.hostname) {
                return Err(DbError::connection("refused"));
            }
            Ok(MockConnection {
                host: node.hostname.clone(),
                id,
                sent: Arc::clone(&self.sent),
            })
        }
    }

    #[async_trait]
    impl CommandConnection for MockConnection {
        async fn call(&mut self, cmd: &redis::Cmd) -> DbResult<redis::Value> {
            let packed = cmd.get_packed_command();
            let reply = if packed.windows(5).any(|w| w == b"\r\nGET") {
                redis::Value::Data(b"hello".to_vec())
            } else {
                redis::Value::Okay
            };
            self.sent.lock().unwrap().push((self.host.clone(), self.id, packed));
            Ok(reply)
        }
    }

    struct Harness {
        kv: KeyValue<MockBackend>,
        connects: Arc<Mutex<Vec<String>>>,
        sent: Sent,
    }

    impl Harness {
        fn new(config: ConnectionConfig) -> Self {
            Self::with_backend(MockBackend::default(), config)
        }

        fn with_backend(backend: MockBackend, config: ConnectionConfig) -> Self {
            let connects = Arc::clone(&backend.connects);
            let sent = Arc::clone(&backend.sent);
            let pool = Arc::new(ConnectionPool::new(backend));
            let kv = KeyValue::new(pool, Arc::new(config))
                .unwrap()
                .with_rng(StdRng::seed_from_u64(11));
            Self { kv, connects, sent }
        }

        fn sent_to(&self, host: &str) -> Vec<Vec<u8>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _, _)| h == host)
                .map(|(_, _, packed)| packed.clone())
                .collect()
        }
    }

    fn sent_on(sent: &Sent, connection: usize) -> Vec<Vec<u8>> {
        sent.lock()
            .unwrap()
            .iter()
            .filter(|(_, id, _)| *id == connection)
            .map(|(_, _, packed)| packed.clone())
            .collect()
    }

    fn single() -> ConnectionConfig {
        ConnectionConfig::builder().kind("redis").hostname("cache0").build()
    }

    fn cluster(rw_separate: bool) -> ConnectionConfig {
        ConnectionConfig::builder()
            .kind("redis")
            .hostname("cache0,cache1")
            .clustered(1)
            .rw_separate(rw_separate)
            .build()
    }

    #[tokio::test]
    async fn test_unsupported_command_opens_no_connection() {
        let mut harness = Harness::new(single());
        let err = harness.kv.execute("eval", ("return 1", 0)).await.unwrap_err();

        assert!(matches!(err, DbError::UnsupportedCommand(ref name) if name == "eval"));
        assert!(harness.connects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_arguments_are_forwarded() {
        let mut harness = Harness::new(single());
        let reply = harness.kv.execute("Set", ("k", "v")).await.unwrap();

        assert_eq!(reply, redis::Value::Okay);
        assert_eq!(
            harness.sent_to("cache0"),
            vec![b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_aliases_send_real_command() {
        let mut harness = Harness::new(single());
        harness.kv.execute("delete", vec!["a", "b"]).await.unwrap();

        assert_eq!(
            harness.sent_to("cache0"),
            vec![b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_reads_and_writes_are_routed() {
        let mut harness = Harness::new(cluster(true));

        let value: String = harness.kv.execute_as("get", "k").await.unwrap();
        assert_eq!(value, "hello");
        harness.kv.execute("incr", "hits").await.unwrap();

        assert_eq!(harness.sent_to("cache1"), vec![b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec()]);
        assert_eq!(
            harness.sent_to("cache0"),
            vec![b"*2\r\n$4\r\nINCR\r\n$4\r\nhits\r\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_select_on_both_links_when_separated() {
        let select = b"*2\r\n$6\r\nSELECT\r\n$1\r\n2\r\n".to_vec();

        let mut separated = Harness::new(cluster(true));
        separated.kv.select(2).await.unwrap();
        assert_eq!(separated.sent_to("cache1"), vec![select.clone()]);
        assert_eq!(separated.sent_to("cache0"), vec![select.clone()]);

        let mut shared = Harness::new(single());
        shared.kv.select(2).await.unwrap();
        assert_eq!(shared.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_select_stays_on_the_selecting_driver() {
        let backend = MockBackend::default();
        let connects = Arc::clone(&backend.connects);
        let sent = Arc::clone(&backend.sent);
        let pool = Arc::new(ConnectionPool::new(backend));
        let config = Arc::new(single());
        let mut a = KeyValue::new(Arc::clone(&pool), Arc::clone(&config)).unwrap();
        let mut b = KeyValue::new(pool, config).unwrap();

        b.execute("get", "k").await.unwrap();
        a.select(2).await.unwrap();
        a.execute("get", "k").await.unwrap();
        b.execute("get", "k").await.unwrap();

        let get = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec();
        let select = b"*2\r\n$6\r\nSELECT\r\n$1\r\n2\r\n".to_vec();
        assert_eq!(connects.lock().unwrap().len(), 2);
        assert_eq!(sent_on(&sent, 0), vec![get.clone(), get.clone()]);
        assert_eq!(sent_on(&sent, 1), vec![select, get.clone()]);

        assert!(a.reset_session());
        a.execute("get", "k").await.unwrap();
        assert_eq!(sent_on(&sent, 0).len(), 3);
        assert_eq!(a.pool_stats().checkouts, 1);
    }

    #[tokio::test]
    async fn test_multi_block_runs_on_one_private_connection() {
        let mut harness = Harness::new(cluster(true));

        harness.kv.execute("multi", NO_ARGS).await.unwrap();
        harness.kv.execute("get", "k").await.unwrap();
        harness.kv.execute("incr", "hits").await.unwrap();
        harness.kv.execute("exec", NO_ARGS).await.unwrap();

        let sent = harness.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|(host, id, _)| host == "cache0" && *id == 0));
        assert_eq!(harness.kv.pool_stats().slots, 0);
    }

    #[tokio::test]
    async fn test_failed_replica_falls_back_for_reads() {
        let backend = MockBackend {
            failing_hosts: HashSet::from(["cache1".to_string()]),
            ..Default::default()
        };
        let mut harness = Harness::with_backend(backend, cluster(true));

        harness.kv.execute("exists", "k").await.unwrap();
        assert_eq!(
            *harness.connects.lock().unwrap(),
            vec!["cache1".to_string(), "cache0".to_string()]
        );
        assert_eq!(harness.kv.pool_stats().fallbacks, 1);
        assert_eq!(harness.sent_to("cache0").len(), 1);
    }

    #[test]
    fn test_default_expire() {
        let harness = Harness::new(single());
        assert_eq!(harness.kv.default_expire(), Duration::from_secs(3600));
        assert!(matches!(
            KeyValue::redis(ConnectionConfig::default()),
            Err(DbError::Configuration(_))
        ));
    }
}
