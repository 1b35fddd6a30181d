//! The per-statement dispatch driver.
//!
//! Order of business for every COM_QUERY that is not transaction control:
//! blacklist, tokenize, route (through the affinity guard when a transaction
//! is open), then either answer locally, report that the statement belongs to
//! the sharding planner, or execute it on the routed backend and relay the
//! result.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::pool::{BackendConn, ConnectionError, Node};
use crate::protocol::{ErrPacket, PacketCodec};
use crate::router::{ExecTarget, RouteDecision, RouteError};
use crate::sql::tokenize;

use super::{Session, SessionError};

impl Session {
    /// Handle one statement. `Ok(true)` means the client got its answer;
    /// `Ok(false)` means the statement needs the sharding planner and nothing
    /// was executed. Routing and execution failures surface as
    /// `SessionError::Dispatch` for the caller to answer as MySQL errors.
    pub(crate) async fn dispatch_statement<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        sql: &str,
    ) -> Result<bool, SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        if sql.is_empty() {
            return Err(DispatchError::Unsupported.into());
        }

        let blacklist = self.proxy.blacklist();
        if !blacklist.is_empty() && blacklist.contains(sql) {
            info!(
                client = %self.peer_addr,
                proxy = %self.proxy.addr(),
                sql = %sql,
                "Forbidden"
            );
            return Err(DispatchError::Blacklisted.into());
        }

        let tokens = tokenize(sql);
        if tokens.is_empty() {
            return Err(DispatchError::Unsupported.into());
        }

        let decision = if self.state.in_transaction {
            let pinned = self.pinned_node();
            self.router
                .decide_in_transaction(sql, &tokens, pinned.as_deref())
        } else {
            self.router.decide(sql, &tokens)
        }
        .map_err(DispatchError::Route)?;

        match decision {
            RouteDecision::Ignore => {
                self.write_ok(client, None).await?;
                Ok(true)
            }
            RouteDecision::NeedsPlanner => Ok(false),
            RouteDecision::Execute(target) => {
                self.execute_target(client, sql, &target).await?;
                Ok(true)
            }
        }
    }

    /// The node already carrying this transaction, when there is exactly one.
    fn pinned_node(&self) -> Option<String> {
        if self.tx_conns.len() == 1 {
            self.tx_conns.keys().next().cloned()
        } else {
            None
        }
    }

    async fn execute_target<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        sql: &str,
        target: &ExecTarget,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let node = self
            .proxy
            .node(&target.node)
            .ok_or_else(|| DispatchError::UnknownNode(target.node.clone()))?;

        let mut conn = if self.state.in_transaction {
            self.transaction_conn(&node).await?
        } else {
            node.acquire(target.is_slave)
                .await
                .map_err(DispatchError::Borrow)?
        };

        let outcome = conn.execute(sql).await;

        // the connection goes back on every exit path: kept in tx_conns
        // while the transaction owns it, pooled otherwise
        if conn.is_usable() {
            if self.state.in_transaction {
                self.tx_conns.insert(node.name().to_string(), conn);
            } else {
                node.release(conn).await;
            }
        }

        let results = match outcome {
            Ok(results) => results,
            Err(ConnectionError::Backend(err)) => {
                if self.state.in_transaction {
                    self.state.tx_aborted = true;
                    warn!(
                        session_id = self.id,
                        error = %err,
                        "Backend error inside transaction, marking aborted"
                    );
                }
                return Err(DispatchError::Backend(err).into());
            }
            Err(e) => return Err(DispatchError::Exec(e).into()),
        };

        let Some(first) = results.first() else {
            error!(sql = %sql, "result is empty");
            return Err(DispatchError::EmptyResult.into());
        };

        self.state.record_result(first);
        debug!(
            session_id = self.id,
            node = %target.node,
            is_slave = target.is_slave,
            affected_rows = self.state.affected_rows,
            last_insert_id = self.state.last_insert_id,
            "Statement executed"
        );

        match &first.resultset {
            Some(rs) => self.write_resultset(client, rs).await,
            None => self.write_ok(client, Some(first)).await,
        }
    }

    /// Borrow the transaction's connection for a node: reuse the held one or
    /// open a fresh master connection and BEGIN on it.
    async fn transaction_conn(&mut self, node: &Arc<Node>) -> Result<BackendConn, DispatchError> {
        if let Some(conn) = self.tx_conns.remove(node.name()) {
            return Ok(conn);
        }

        let mut conn = node.acquire(false).await.map_err(DispatchError::Borrow)?;
        match conn.begin().await {
            Ok(()) => Ok(conn),
            Err(ConnectionError::Backend(err)) => {
                node.release(conn).await;
                Err(DispatchError::Backend(err))
            }
            Err(e) => Err(DispatchError::Exec(e)),
        }
    }
}

/// Everything the dispatcher can reject a statement with. Each value is
/// answered as a MySQL error packet; the session stays up.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("command unsupport")]
    Unsupported,

    #[error("sql in blacklist.")]
    Blacklisted,

    #[error("unknown backend node '{0}'")]
    UnknownNode(String),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("failed to borrow backend connection: {0}")]
    Borrow(#[source] ConnectionError),

    #[error("backend execution failed: {0}")]
    Exec(#[source] ConnectionError),

    /// The backend's own error packet, forwarded verbatim.
    #[error("{}", .0.error_message)]
    Backend(ErrPacket),

    #[error("result is empty")]
    EmptyResult,
}

impl DispatchError {
    /// The error packet the client receives.
    pub fn to_err_packet(&self) -> ErrPacket {
        match self {
            DispatchError::Backend(err) => err.clone(),
            other => ErrPacket::unknown(&other.to_string()),
        }
    }
}
