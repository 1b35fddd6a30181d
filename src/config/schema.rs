use serde::Deserialize;
use std::path::PathBuf;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
}

impl Config {
    /// Reject configurations the router cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("no backend nodes configured".to_string());
        }
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err("node with empty name".to_string());
            }
        }
        for name in &self.schema.default_nodes {
            if !self.nodes.iter().any(|n| &n.name == name) {
                return Err(format!("default node '{name}' is not a configured node"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Credentials clients authenticate with against the proxy.
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_listen_port() -> u16 {
    4000
}

/// One named backend cluster member: a master and optional read replicas.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub master: BackendConfig,
    #[serde(default)]
    pub slaves: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

impl BackendConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Routing schema: where unsharded statements go and which tables are
/// governed by sharding rules.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub default_nodes: Vec<String>,
    #[serde(default)]
    pub shard_tables: Vec<String>,
    #[serde(default = "default_master_hint")]
    pub master_hint: String,
}

fn default_master_hint() -> String {
    "master".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(
            r#"
            [server]
            listen_addr = "127.0.0.1"
            user = "proxy"
            password = "secret"

            [[nodes]]
            name = "node1"
            master = { host = "127.0.0.1", port = 3306, user = "root" }

            [schema]
            default_nodes = ["node1"]
            shard_tables = ["users"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn parses_with_defaults() {
        let config = minimal();
        assert_eq!(config.server.listen_port, 4000);
        assert_eq!(config.schema.master_hint, "master");
        assert!(config.blacklist.path.is_none());
        assert!(config.nodes[0].slaves.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_default_node() {
        let mut config = minimal();
        config.schema.default_nodes = vec!["ghost".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_node_list() {
        let mut config = minimal();
        config.nodes.clear();
        assert!(config.validate().is_err());
    }
}
