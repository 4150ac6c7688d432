//! Connection Pool Management
//!
//! A pool is a map of integer slots to lazily created connections. Slot 0
//! is the single-node slot; in clustered mode the slot number is the node
//! index. Connections are never closed proactively and live as long as the
//! pool.
//!
//! Slot connections are shared by every driver on the pool, so they must
//! never carry session state. A driver that needs some (an open transaction,
//! a switched database) takes a private connection with
//! [`ConnectionPool::checkout`] instead.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use super::statistics::PoolStats;
use crate::backends::Connector;
use crate::config::NodeConfig;
use crate::error::{DbError, DbResult};

/// A pooled connection; the mutex serialises operations on it
pub type SharedConnection<C> = Arc<Mutex<C>>;

type Slot<C> = Arc<OnceCell<SharedConnection<C>>>;

/// Slot-keyed connection pool shared by every driver of a backend
pub struct ConnectionPool<B: Connector> {
    backend: Arc<B>,
    slots: DashMap<usize, Slot<B::Connection>>,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    fallbacks: AtomicU64,
    checkouts: AtomicU64,
}

impl<B: Connector> ConnectionPool<B> {
    pub fn new(backend: B) -> Self {
        Self::with_backend(Arc::new(backend))
    }

    pub fn with_backend(backend: Arc<B>) -> Self {
        Self {
            backend,
            slots: DashMap::new(),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            checkouts: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Return the connection held in `slot`, creating it on first use.
    ///
    /// Concurrent first access to one slot connects once; the losers wait for
    /// the winner. When connecting to `node` fails and a `fallback` is given,
    /// a single retry is made against it. A failed slot stays empty so a later
    /// call may try again.
    pub async fn connect(
        &self,
        node: &NodeConfig,
        slot: usize,
        fallback: Option<&NodeConfig>,
    ) -> DbResult<SharedConnection<B::Connection>> {
        let cell = self
            .slots
            .entry(slot)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let conn = cell
            .get_or_try_init(|| self.open(node, slot, fallback))
            .await?;
        Ok(conn.clone())
    }

    /// Open a private connection outside the slot map.
    ///
    /// The connection belongs to the caller alone and is closed when its
    /// last handle is dropped; the shared connection in `slot` is untouched.
    /// Fallback rules are the same as for [`connect`](Self::connect).
    pub async fn checkout(
        &self,
        node: &NodeConfig,
        slot: usize,
        fallback: Option<&NodeConfig>,
    ) -> DbResult<SharedConnection<B::Connection>> {
        let conn = self.open(node, slot, fallback).await?;
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        debug!("Checked out a private connection for slot {}", slot);
        Ok(conn)
    }

    async fn open(
        &self,
        node: &NodeConfig,
        slot: usize,
        fallback: Option<&NodeConfig>,
    ) -> DbResult<SharedConnection<B::Connection>> {
        debug!("Opening slot {} on {}", slot, node.address());

        let err = match self.try_connect(node).await {
            Ok(conn) => {
                info!("Slot {} connected to {}", slot, node.address());
                return Ok(Arc::new(Mutex::new(conn)));
            }
            Err(err) => err,
        };

        let Some(fallback) = fallback else {
            error!("Connection to {} failed: {}", node.address(), err);
            return Err(node_error(err, node));
        };

        warn!(
            "Connection to {} failed ({}), falling back to {}",
            node.address(),
            err,
            fallback.address()
        );
        self.fallbacks.fetch_add(1, Ordering::Relaxed);

        match self.try_connect(fallback).await {
            Ok(conn) => {
                info!("Slot {} connected to fallback {}", slot, fallback.address());
                Ok(Arc::new(Mutex::new(conn)))
            }
            Err(err) => {
                error!("Fallback connection to {} failed: {}", fallback.address(), err);
                Err(node_error(err, fallback))
            }
        }
    }

    async fn try_connect(&self, node: &NodeConfig) -> DbResult<B::Connection> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.backend.connect(node).await.map_err(|err| {
            self.connect_failures.fetch_add(1, Ordering::Relaxed);
            err
        })
    }

    /// Whether `slot` holds a live connection
    pub fn contains(&self, slot: usize) -> bool {
        self.slots
            .get(&slot)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            slots: self.len(),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
        }
    }
}

impl<B: Connector> fmt::Debug for ConnectionPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Final connect failure, tagged with the node it was for
fn node_error(err: DbError, node: &NodeConfig) -> DbError {
    let message = match err {
        DbError::Connection { message, .. } => message,
        other => other.to_string(),
    };
    DbError::Connection {
        message,
        config: Some(node.redacted()),
    }
}
