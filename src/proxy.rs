//! Shared, read-mostly proxy state.
//!
//! One `ProxyState` is built at startup and shared by every session task:
//! the node pools, the immutable routing rule, the swappable blacklist, and
//! the proxy's own identity for auth and logging. Sessions never take locks
//! here; the rule is immutable and the blacklist publishes by version.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::blacklist::SqlBlacklist;
use crate::config::Config;
use crate::pool::{Node, NodeSet, PoolConfig};
use crate::router::RouteRule;

pub struct ProxyState {
    nodes: NodeSet,
    rule: Arc<RouteRule>,
    blacklist: SqlBlacklist,
    blacklist_path: Option<PathBuf>,
    addr: String,
    auth_user: String,
    auth_password: String,
}

impl ProxyState {
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let nodes = NodeSet::from_config(&config.nodes, &PoolConfig::default());
        let rule = Arc::new(RouteRule::new(
            config.nodes.iter().map(|n| n.name.clone()),
            &config.schema,
        ));

        let blacklist = match &config.blacklist.path {
            Some(path) => SqlBlacklist::from_file(path)?,
            None => SqlBlacklist::new(),
        };

        Ok(Self {
            nodes,
            rule,
            blacklist,
            blacklist_path: config.blacklist.path.clone(),
            addr: format!(
                "{}:{}",
                config.server.listen_addr, config.server.listen_port
            ),
            auth_user: config.server.user.clone(),
            auth_password: config.server.password.clone(),
        })
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.names().map(str::to_string).collect()
    }

    pub fn rule(&self) -> Arc<RouteRule> {
        self.rule.clone()
    }

    pub fn blacklist(&self) -> &SqlBlacklist {
        &self.blacklist
    }

    /// Re-read the blacklist file, if one is configured.
    pub fn reload_blacklist(&self) {
        let Some(path) = &self.blacklist_path else {
            warn!("Blacklist reload requested but no blacklist file is configured");
            return;
        };
        match self.blacklist.reload_from_file(path) {
            Ok(entries) => info!(
                entries,
                version = self.blacklist.version(),
                "Blacklist reloaded"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "Blacklist reload failed"),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn auth_user(&self) -> &str {
        &self.auth_user
    }

    pub fn auth_password(&self) -> &str {
        &self.auth_password
    }
}
