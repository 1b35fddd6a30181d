use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::BackendConfig;

use super::connection::{BackendConn, ConnectionError};

/// Idle-pool tuning for one backend endpoint.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle connections kept around.
    pub max_idle: usize,
    /// Maximum connection age before recycling.
    pub max_age: Duration,
    /// Maximum idle time before closing.
    pub max_idle_time: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 16,
            max_age: Duration::from_secs(3600),
            max_idle_time: Duration::from_secs(300),
        }
    }
}

/// Idle connections for one endpoint of a node, labelled with the role the
/// router assigned it. Borrowers take a connection per statement and hand it
/// back afterwards; a session in a transaction keeps its connection out of
/// the pool until the transaction ends.
///
/// Staleness is swept on borrow, not on return: every `acquire` first drops
/// the idle entries that aged out while nobody was looking.
pub struct BackendPool {
    config: PoolConfig,
    backend: BackendConfig,
    role: &'static str,
    idle: Mutex<VecDeque<BackendConn>>,
}

impl BackendPool {
    pub fn new(backend: BackendConfig, role: &'static str, config: PoolConfig) -> Self {
        Self {
            config,
            backend,
            role,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    /// Borrow a connection, opening a fresh one when nothing idle survives
    /// the staleness sweep.
    pub async fn acquire(&self) -> Result<BackendConn, ConnectionError> {
        let reused = {
            let mut idle = self.idle.lock().await;
            let before = idle.len();
            idle.retain(|conn| self.is_fresh(conn));
            let swept = before - idle.len();
            if swept > 0 {
                debug!(
                    addr = %self.addr(),
                    role = self.role,
                    swept,
                    "Swept stale idle connections"
                );
            }
            idle.pop_front()
        };

        let mut conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(addr = %self.addr(), role = self.role, "Opening backend connection");
                BackendConn::connect(&self.backend).await?
            }
        };
        conn.mark_in_use();
        Ok(conn)
    }

    /// Hand a connection back. The pool keeps it only when it is still
    /// serviceable, there is room for it, and it scrubs clean; anything else
    /// is closed by dropping it.
    pub async fn release(&self, mut conn: BackendConn) {
        conn.mark_idle();

        if !conn.is_usable() || !self.is_fresh(&conn) {
            debug!(
                addr = %self.addr(),
                role = self.role,
                "Returned connection no longer serviceable"
            );
            return;
        }

        // don't pay for a COM_RESET_CONNECTION round-trip when there is no
        // room to keep the connection anyway
        if self.idle.lock().await.len() >= self.config.max_idle {
            debug!(addr = %self.addr(), role = self.role, "Idle cap reached, closing connection");
            return;
        }

        if !conn.reset().await {
            warn!(addr = %self.addr(), role = self.role, "Connection refused reset, closing it");
            return;
        }

        // the cap may have been reached while the reset was in flight
        let mut idle = self.idle.lock().await;
        if idle.len() < self.config.max_idle {
            idle.push_back(conn);
        }
    }

    fn is_fresh(&self, conn: &BackendConn) -> bool {
        !conn.is_expired(self.config.max_age) && !conn.is_idle_too_long(self.config.max_idle_time)
    }

    pub fn addr(&self) -> String {
        self.backend.addr()
    }
}
