//! Master/replica routing
//!
//! Nodes `0..master_num` are masters, the rest are replicas. A router picks
//! one master per link, caches the read and write links it opened, and asks
//! the pool for a connection keyed by node index.
//!
//! A link can be made private with [`ConnectionRouter::dedicate`]. Private
//! links take precedence over the shared ones until
//! [`ConnectionRouter::release`] drops them.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::pool::{ConnectionPool, SharedConnection};
use crate::backends::Connector;
use crate::config::{ConnectionConfig, Deploy, NodeConfig};
use crate::error::DbResult;

/// Nodes chosen for one connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSelection {
    /// Master index, used as the fallback when it differs from `target`
    pub master: usize,
    pub target: usize,
}

impl NodeSelection {
    pub fn fallback(&self) -> Option<usize> {
        (self.target != self.master).then_some(self.master)
    }
}

/// Links served by a private connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScope {
    Read,
    Write,
    /// One connection for reads and writes alike
    Both,
}

/// Per-driver connection router over a shared pool
pub struct ConnectionRouter<B: Connector> {
    pool: Arc<ConnectionPool<B>>,
    config: Arc<ConnectionConfig>,
    read: Option<SharedConnection<B::Connection>>,
    write: Option<SharedConnection<B::Connection>>,
    private_read: Option<SharedConnection<B::Connection>>,
    private_write: Option<SharedConnection<B::Connection>>,
    rng: StdRng,
}

impl<B: Connector> ConnectionRouter<B> {
    pub fn new(pool: Arc<ConnectionPool<B>>, config: Arc<ConnectionConfig>) -> Self {
        Self {
            pool,
            config,
            read: None,
            write: None,
            private_read: None,
            private_write: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the node selection RNG, e.g. with a seeded one
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<B>> {
        &self.pool
    }

    /// Pick a master and the node to use for this link
    pub fn select_nodes(&mut self, want_master: bool) -> NodeSelection {
        let total = self.config.node_count();
        let master_num = self.config.master_num.clamp(1, total);
        let master = self.rng.gen_range(0..master_num);

        let target = if want_master {
            master
        } else if self.config.rw_separate {
            match self.config.slave_no {
                Some(slave) => slave,
                None if total > master_num => self.rng.gen_range(master_num..total),
                None => master,
            }
        } else {
            self.rng.gen_range(0..total)
        };

        NodeSelection { master, target }
    }

    /// Connection for the next statement.
    ///
    /// A private link is used when one is held. Otherwise single deployments
    /// always use slot 0, and clustered deployments reuse the cached write or
    /// read link, opening it through [`multi_connect`](Self::multi_connect)
    /// on first use.
    pub async fn init_connect(
        &mut self,
        want_master: bool,
    ) -> DbResult<SharedConnection<B::Connection>> {
        let private = if want_master { &self.private_write } else { &self.private_read };
        if let Some(conn) = private {
            return Ok(conn.clone());
        }

        if self.config.deploy == Deploy::Single {
            return self.pool.connect(&self.config.node(0), 0, None).await;
        }

        let cached = if want_master { &self.write } else { &self.read };
        if let Some(conn) = cached {
            return Ok(conn.clone());
        }

        let conn = self.multi_connect(want_master).await?;
        if want_master {
            self.write = Some(conn.clone());
        } else {
            self.read = Some(conn.clone());
        }
        Ok(conn)
    }

    /// Select nodes and connect, with the master as fallback for replicas
    pub async fn multi_connect(
        &mut self,
        want_master: bool,
    ) -> DbResult<SharedConnection<B::Connection>> {
        let (node, slot, fallback) = self.route(want_master);
        self.pool.connect(&node, slot, fallback.as_ref()).await
    }

    /// Serve `scope` from a private connection until [`release`](Self::release).
    ///
    /// An existing private link for the same side is reused. With
    /// [`LinkScope::Both`] the private write connection also serves reads.
    pub async fn dedicate(&mut self, scope: LinkScope) -> DbResult<SharedConnection<B::Connection>> {
        let want_master = scope != LinkScope::Read;
        let held = if want_master { self.private_write.clone() } else { self.private_read.clone() };

        let conn = match held {
            Some(conn) => conn,
            None => {
                let (node, slot, fallback) = self.route(want_master);
                self.pool.checkout(&node, slot, fallback.as_ref()).await?
            }
        };

        match scope {
            LinkScope::Read => self.private_read = Some(conn.clone()),
            LinkScope::Write => self.private_write = Some(conn.clone()),
            LinkScope::Both => {
                self.private_read = Some(conn.clone());
                self.private_write = Some(conn.clone());
            }
        }
        Ok(conn)
    }

    /// Drop private links; returns whether any was held
    pub fn release(&mut self) -> bool {
        let held = self.is_dedicated();
        if held {
            debug!("Releasing private connection(s)");
        }
        self.private_read = None;
        self.private_write = None;
        held
    }

    pub fn is_dedicated(&self) -> bool {
        self.private_read.is_some() || self.private_write.is_some()
    }

    /// Node, slot and fallback for the next connect
    fn route(&mut self, want_master: bool) -> (NodeConfig, usize, Option<NodeConfig>) {
        if self.config.deploy == Deploy::Single {
            return (self.config.node(0), 0, None);
        }

        let selection = self.select_nodes(want_master);
        debug!(
            "Routing {} to node {} (master {})",
            if want_master { "write" } else { "read" },
            selection.target,
            selection.master
        );

        let node = self.config.node(selection.target);
        let fallback = selection.fallback().map(|index| self.config.node(index));
        (node, selection.target, fallback)
    }

    /// Cached read link, if one was opened
    pub fn read_link(&self) -> Option<&SharedConnection<B::Connection>> {
        self.read.as_ref()
    }

    /// Cached write link, if one was opened
    pub fn write_link(&self) -> Option<&SharedConnection<B::Connection>> {
        self.write.as_ref()
    }
}

impl<B: Connector> fmt::Debug for ConnectionRouter<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("config", &self.config.redacted())
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("dedicated", &self.is_dedicated())
            .finish()
    }
}
