use std::collections::HashSet;

use crate::config::SchemaConfig;

/// Immutable-after-load routing table: which nodes exist, where unsharded
/// statements go, which tables belong to the sharding planner, and the
/// keyword that forces a SELECT onto the master.
#[derive(Debug, Clone)]
pub struct RouteRule {
    node_names: HashSet<String>,
    default_nodes: Vec<String>,
    shard_tables: HashSet<String>,
    master_hint: String,
}

impl RouteRule {
    pub fn new(node_names: impl IntoIterator<Item = String>, schema: &SchemaConfig) -> Self {
        Self {
            node_names: node_names.into_iter().collect(),
            default_nodes: schema.default_nodes.clone(),
            shard_tables: schema
                .shard_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            master_hint: schema.master_hint.to_lowercase(),
        }
    }

    /// Whether a `/*name*/` hint names a configured node.
    pub fn has_node(&self, name: &str) -> bool {
        self.node_names.contains(name)
    }

    /// The node unsharded statements execute on when no hint applies.
    pub fn default_node(&self) -> Option<&str> {
        self.default_nodes.first().map(String::as_str)
    }

    /// Whether a table is governed by a sharding rule (case-insensitive).
    pub fn is_sharded(&self, table: &str) -> bool {
        self.shard_tables.contains(&table.to_lowercase())
    }

    pub fn master_hint(&self) -> &str {
        &self.master_hint
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Rule builder for routing tests.
    pub fn rule(nodes: &[&str], default_nodes: &[&str], shard_tables: &[&str]) -> RouteRule {
        RouteRule {
            node_names: nodes.iter().map(|s| s.to_string()).collect(),
            default_nodes: default_nodes.iter().map(|s| s.to_string()).collect(),
            shard_tables: shard_tables.iter().map(|s| s.to_lowercase()).collect(),
            master_hint: "master".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::rule;

    #[test]
    fn shard_membership_is_case_insensitive() {
        let rule = rule(&["node1"], &["node1"], &["Users"]);
        assert!(rule.is_sharded("users"));
        assert!(rule.is_sharded("USERS"));
        assert!(!rule.is_sharded("orders"));
    }

    #[test]
    fn default_node_is_first_entry() {
        let rule = rule(&["node1", "node2"], &["node2", "node1"], &[]);
        assert_eq!(rule.default_node(), Some("node2"));

        let empty = rule_without_defaults();
        assert_eq!(empty.default_node(), None);
    }

    fn rule_without_defaults() -> super::RouteRule {
        rule(&["node1"], &[], &[])
    }
}
