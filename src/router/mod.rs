//! Per-statement routing.
//!
//! The router never performs I/O: it walks the statement's tokens, consults
//! the shard-table rule, and produces either an execution target (node +
//! role), a needs-planner verdict for sharded tables, or an ignore verdict
//! for statements the proxy answers locally.

mod kind;
mod rule;

pub use kind::{classify, StmtKind};
pub use rule::RouteRule;

use std::sync::Arc;

use crate::sql::{insert_table_name, is_comment_token, strip_comment_hint, table_name};

/// Session variables the proxy acknowledges locally instead of forwarding.
const SESSION_VARIABLES: &[&str] = &[
    "autocommit",
    "names",
    "charset",
    "character_set_client",
    "character_set_connection",
    "character_set_results",
];

/// Where a statement executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub node: String,
    pub is_slave: bool,
}

impl ExecTarget {
    fn master(node: &str) -> Self {
        Self {
            node: node.to_string(),
            is_slave: false,
        }
    }
}

/// Outcome of routing one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Execute on this node with this role.
    Execute(ExecTarget),
    /// The statement touches a sharded table (or session-local SELECT
    /// semantics); it belongs to the sharding planner, not to plain
    /// forwarding.
    NeedsPlanner,
    /// Answer OK locally; nothing reaches a backend.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no default node")]
    NoDefaultNode,
    #[error("transaction spans multiple nodes")]
    TransactionSpansNodes,
    #[error("sharded table statement inside a transaction")]
    ShardedInTransaction,
}

pub struct Router {
    rule: Arc<RouteRule>,
}

impl Router {
    pub fn new(rule: Arc<RouteRule>) -> Self {
        Self { rule }
    }

    /// Route a statement outside any transaction. `tokens` must be the
    /// non-empty tokenization of `sql`.
    pub fn decide(&self, sql: &str, tokens: &[&str]) -> Result<RouteDecision, RouteError> {
        match classify(tokens[0]) {
            StmtKind::Select => self.decide_select(tokens),
            StmtKind::Delete => self.decide_delete(tokens),
            StmtKind::InsertOrReplace => self.decide_insert(tokens),
            StmtKind::Update => self.decide_update(tokens),
            StmtKind::Set => self.decide_set(sql, tokens),
            StmtKind::Show => self.resolve_node(tokens, true),
            StmtKind::Other => self.resolve_node(tokens, false),
        }
    }

    /// Route a statement inside a transaction. `pinned` is the node already
    /// carrying this transaction's connection, if any. The role is always
    /// master, the decided node must not escape the pinned node, and sharded
    /// statements are rejected outright.
    pub fn decide_in_transaction(
        &self,
        sql: &str,
        tokens: &[&str],
        pinned: Option<&str>,
    ) -> Result<RouteDecision, RouteError> {
        if tokens.len() >= 2 && is_comment_token(tokens[0]) {
            let name = strip_comment_hint(tokens[0]);
            if self.rule.has_node(name) {
                return confined(ExecTarget::master(name), pinned);
            }
        }

        match self.decide(sql, tokens)? {
            RouteDecision::Execute(mut target) => {
                target.is_slave = false;
                confined(target, pinned)
            }
            RouteDecision::NeedsPlanner => Err(RouteError::ShardedInTransaction),
            RouteDecision::Ignore => Ok(RouteDecision::Ignore),
        }
    }

    fn decide_select(&self, tokens: &[&str]) -> Result<RouteDecision, RouteError> {
        for i in 1..tokens.len() {
            let lower = tokens[i].to_lowercase();
            if lower == "from" {
                if let Some(next) = tokens.get(i + 1) {
                    if self.rule.is_sharded(table_name(next)) {
                        return Ok(RouteDecision::NeedsPlanner);
                    }
                    // unsharded table: plain forwarding to the default node
                    break;
                }
            } else if lower == "last_insert_id" {
                // session-local value; the planner tracks it per connection
                return Ok(RouteDecision::NeedsPlanner);
            }
        }

        let mut is_slave = true;
        if tokens.len() > 2 && tokens[1].to_lowercase() == self.rule.master_hint() {
            is_slave = false;
        }
        self.resolve_node(tokens, is_slave)
    }

    fn decide_delete(&self, tokens: &[&str]) -> Result<RouteDecision, RouteError> {
        for i in 1..tokens.len() {
            if tokens[i].to_lowercase() == "from" {
                if let Some(next) = tokens.get(i + 1) {
                    if self.rule.is_sharded(table_name(next)) {
                        return Ok(RouteDecision::NeedsPlanner);
                    }
                }
            }
        }
        self.resolve_node(tokens, false)
    }

    fn decide_insert(&self, tokens: &[&str]) -> Result<RouteDecision, RouteError> {
        for i in 0..tokens.len() {
            if tokens[i].to_lowercase() == "into" {
                if let Some(next) = tokens.get(i + 1) {
                    if self.rule.is_sharded(insert_table_name(next)) {
                        return Ok(RouteDecision::NeedsPlanner);
                    }
                }
            }
        }
        self.resolve_node(tokens, false)
    }

    fn decide_update(&self, tokens: &[&str]) -> Result<RouteDecision, RouteError> {
        for i in 0..tokens.len() {
            // i == 0 would underflow below; a leading SET cannot name a table
            if i > 0 && tokens[i].to_lowercase() == "set" {
                if self.rule.is_sharded(table_name(tokens[i - 1])) {
                    return Ok(RouteDecision::NeedsPlanner);
                }
            }
        }
        self.resolve_node(tokens, false)
    }

    /// SET handling works on the raw text: everything left of the first `=`
    /// split on spaces names the variable.
    fn decide_set(&self, sql: &str, tokens: &[&str]) -> Result<RouteDecision, RouteError> {
        if tokens.len() >= 2 {
            let before = sql.split('=').next().unwrap_or("");
            let words: Vec<&str> = before.split_whitespace().collect();

            if let Some(second) = words.get(1) {
                let second = second.to_lowercase();
                if SESSION_VARIABLES.contains(&second.as_str()) {
                    return Ok(RouteDecision::Ignore);
                }
                // SET [GLOBAL|SESSION] TRANSACTION ISOLATION LEVEL ...
                if second == "transaction" {
                    return Ok(RouteDecision::Ignore);
                }
            }
            if let Some(third) = words.get(2) {
                if third.to_lowercase() == "transaction" {
                    return Ok(RouteDecision::Ignore);
                }
            }
        }

        self.resolve_node(tokens, false)
    }

    /// Pick the node: a leading `/*name*/` hint naming a configured node wins,
    /// otherwise the first default-rule node. With a hint, a `select` in
    /// second position coerces the role to slave unless the master hint sits
    /// there instead.
    fn resolve_node(
        &self,
        tokens: &[&str],
        mut is_slave: bool,
    ) -> Result<RouteDecision, RouteError> {
        let mut node: Option<&str> = None;

        if tokens.len() >= 2 && is_comment_token(tokens[0]) {
            let name = strip_comment_hint(tokens[0]);
            if self.rule.has_node(name) {
                node = Some(name);
            }
            let second = tokens[1].to_lowercase();
            if second == "select" {
                is_slave = true;
            } else if second == self.rule.master_hint() {
                is_slave = false;
            }
        }

        let node = match node {
            Some(name) => name,
            None => self.rule.default_node().ok_or(RouteError::NoDefaultNode)?,
        };

        Ok(RouteDecision::Execute(ExecTarget {
            node: node.to_string(),
            is_slave,
        }))
    }
}

fn confined(target: ExecTarget, pinned: Option<&str>) -> Result<RouteDecision, RouteError> {
    match pinned {
        Some(node) if node != target.node => Err(RouteError::TransactionSpansNodes),
        _ => Ok(RouteDecision::Execute(target)),
    }
}
