use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::NodeConfig;

use super::backend::{BackendPool, PoolConfig};
use super::connection::{BackendConn, ConnectionError};

/// One named backend cluster member: a master pool plus zero or more slave
/// pools with a round-robin counter. The router addresses nodes by name and
/// never looks inside.
pub struct Node {
    name: String,
    master: Arc<BackendPool>,
    slaves: Vec<Arc<BackendPool>>,
    next_slave: AtomicUsize,
}

impl Node {
    pub fn from_config(config: &NodeConfig, pool_config: &PoolConfig) -> Self {
        let master = Arc::new(BackendPool::new(
            config.master.clone(),
            "master",
            pool_config.clone(),
        ));
        let slaves = config
            .slaves
            .iter()
            .map(|slave| Arc::new(BackendPool::new(slave.clone(), "slave", pool_config.clone())))
            .collect();

        Self {
            name: config.name.clone(),
            master,
            slaves,
            next_slave: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow a connection for the given role. Slave borrows round-robin over
    /// the replicas and fall back to the master when none are configured.
    pub async fn acquire(&self, is_slave: bool) -> Result<BackendConn, ConnectionError> {
        if is_slave {
            if let Some(pool) = self.pick_slave() {
                return pool.acquire().await;
            }
        }
        self.master.acquire().await
    }

    /// Hand a connection back to whichever pool it came from, matched by
    /// backend address. Unmatched connections are dropped.
    pub async fn release(&self, conn: BackendConn) {
        let addr = conn.addr().to_string();

        if self.master.addr() == addr {
            self.master.release(conn).await;
            return;
        }
        if let Some(pool) = self.slaves.iter().find(|p| p.addr() == addr) {
            pool.release(conn).await;
            return;
        }

        debug!(node = %self.name, addr = %addr, "Connection matches no pool, discarding");
    }

    fn pick_slave(&self) -> Option<&Arc<BackendPool>> {
        if self.slaves.is_empty() {
            return None;
        }
        let idx = self.next_slave.fetch_add(1, Ordering::Relaxed) % self.slaves.len();
        Some(&self.slaves[idx])
    }
}

/// All configured nodes, by name.
pub struct NodeSet {
    nodes: HashMap<String, Arc<Node>>,
}

impl NodeSet {
    pub fn from_config(configs: &[NodeConfig], pool_config: &PoolConfig) -> Self {
        let nodes = configs
            .iter()
            .map(|config| {
                (
                    config.name.clone(),
                    Arc::new(Node::from_config(config, pool_config)),
                )
            })
            .collect();
        Self { nodes }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}
