//! One task per connected client: handshake, authentication, and the command
//! loop that feeds statements into the dispatcher.

mod dispatch;
mod state;

pub use dispatch::DispatchError;
pub use state::SessionState;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::pool::{BackendConn, ConnectionError};
use crate::protocol::{
    command, error_codes, response::put_lenc_int, scramble_password, EofPacket, ErrPacket,
    HandshakeResponse, InitialHandshake, OkPacket, Packet, PacketCodec, QueryResult, Resultset,
};
use crate::proxy::ProxyState;
use crate::router::Router;

/// Server-side state for one client connection.
pub struct Session {
    id: u32,
    peer_addr: String,
    state: SessionState,
    proxy: Arc<ProxyState>,
    router: Router,
    /// Transactional connections held by this session, one per node. Empty
    /// outside transactions. Never touched by another task.
    tx_conns: HashMap<String, BackendConn>,
}

impl Session {
    pub fn new(id: u32, peer_addr: String, proxy: Arc<ProxyState>) -> Self {
        let router = Router::new(proxy.rule());
        Self {
            id,
            peer_addr,
            state: SessionState::new(),
            proxy,
            router,
            tx_conns: HashMap::new(),
        }
    }

    /// Drive the session to completion.
    pub async fn run<S>(mut self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client = Framed::new(stream, PacketCodec);

        let handshake = InitialHandshake::for_client(self.id);
        let scramble = handshake.scramble();
        client.send(handshake.encode()).await?;

        let response_packet = client
            .next()
            .await
            .ok_or(SessionError::ClientDisconnected)??;
        let response = HandshakeResponse::parse(&response_packet.payload)
            .ok_or_else(|| SessionError::Protocol("invalid handshake response".into()))?;

        debug!(
            session_id = self.id,
            username = %response.username,
            database = ?response.database,
            charset = response.character_set,
            "Received handshake response"
        );

        if !self.authenticate(&response, &scramble) {
            warn!(
                session_id = self.id,
                client = %self.peer_addr,
                username = %response.username,
                "Access denied"
            );
            let err = ErrPacket::new(
                error_codes::ER_ACCESS_DENIED_ERROR,
                "28000",
                &format!("Access denied for user '{}'", response.username),
            );
            client.send(err.encode(2, response.capability_flags)).await?;
            return Ok(());
        }

        self.state.set_from_handshake(
            response.username.clone(),
            response.database.clone(),
            response.capability_flags,
        );

        client
            .send(OkPacket::with_status(self.state.status).encode(2, self.state.capability_flags))
            .await?;

        info!(
            session_id = self.id,
            client = %self.peer_addr,
            username = %self.state.username,
            database = ?self.state.database,
            "Client authenticated"
        );

        let result = self.command_loop(&mut client).await;

        // a dropped client must not leak an open transaction onto the pool
        if !self.tx_conns.is_empty() {
            self.rollback_held_connections().await;
        }

        result
    }

    fn authenticate(&self, response: &HandshakeResponse, scramble: &[u8]) -> bool {
        let expected = scramble_password(self.proxy.auth_password(), scramble);
        response.username == self.proxy.auth_user() && response.auth_response == expected
    }

    async fn command_loop<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let packet = match client.next().await {
                Some(Ok(p)) => p,
                Some(Err(e)) => {
                    warn!(session_id = self.id, error = %e, "Client read error");
                    return Err(e.into());
                }
                None => {
                    info!(session_id = self.id, "Client disconnected");
                    return Ok(());
                }
            };

            let Some(&cmd) = packet.payload.first() else {
                self.write_err(client, ErrPacket::unknown("command unsupport"))
                    .await?;
                continue;
            };
            let data = packet.payload.slice(1..);

            match cmd {
                command::COM_QUIT => {
                    info!(session_id = self.id, "Client quit");
                    return Ok(());
                }
                command::COM_PING => self.write_ok(client, None).await?,
                command::COM_INIT_DB => {
                    let db = String::from_utf8_lossy(&data).to_string();
                    debug!(session_id = self.id, database = %db, "Database changed");
                    self.state.database = (!db.is_empty()).then_some(db);
                    self.write_ok(client, None).await?;
                }
                command::COM_QUERY => {
                    let sql = String::from_utf8_lossy(&data).to_string();
                    self.handle_query(client, &sql).await?;
                }
                other => {
                    let msg = format!("command {other} not supported now");
                    self.write_err(client, ErrPacket::unknown(&msg)).await?;
                }
            }
        }
    }

    async fn handle_query<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        sql: &str,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        debug!(session_id = self.id, sql = %truncate_sql(sql, 100), "Query received");

        // transaction control never reaches the routing tokenizer
        let upper = sql.to_uppercase();
        if upper.starts_with("BEGIN") || upper.starts_with("START TRANSACTION") {
            return self.handle_begin(client).await;
        }
        if upper.starts_with("COMMIT") {
            return self.finish_transaction(client, false).await;
        }
        if upper.starts_with("ROLLBACK") {
            return self.finish_transaction(client, true).await;
        }

        match self.dispatch_statement(client, sql).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                // the sharded-table planner lives outside this proxy
                warn!(
                    session_id = self.id,
                    sql = %truncate_sql(sql, 100),
                    "Statement requires the sharding planner"
                );
                self.write_err(
                    client,
                    ErrPacket::unknown("cross-shard statement is not supported"),
                )
                .await
            }
            Err(SessionError::Dispatch(e)) => {
                debug!(session_id = self.id, error = %e, "Statement rejected");
                self.write_err(client, e.to_err_packet()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_begin<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        // no backend is touched yet; binding happens when the first routed
        // statement picks its node
        if !self.state.in_transaction {
            self.state.begin_transaction();
        }
        self.write_ok(client, None).await
    }

    /// COMMIT or ROLLBACK: run the verb on every held connection, hand the
    /// connections back, and answer the client.
    async fn finish_transaction<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        rollback: bool,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state.in_transaction && self.state.tx_aborted && !rollback {
            warn!(session_id = self.id, "Committing a transaction previously marked aborted");
        }

        let mut first_err: Option<ErrPacket> = None;
        let held: Vec<(String, BackendConn)> = self.tx_conns.drain().collect();

        for (node_name, mut conn) in held {
            let result = if rollback {
                conn.rollback().await
            } else {
                conn.commit().await
            };

            match result {
                Ok(()) => {}
                Err(ConnectionError::Backend(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = self.id,
                        node = %node_name,
                        error = %e,
                        "Failed to finish transaction on backend"
                    );
                }
            }

            if conn.is_usable() {
                if let Some(node) = self.proxy.node(&node_name) {
                    node.release(conn).await;
                }
            }
        }

        self.state.end_transaction();

        match first_err {
            Some(err) => self.write_err(client, err).await,
            None => self.write_ok(client, None).await,
        }
    }

    /// Cancellation path: the client vanished while a transaction was open.
    async fn rollback_held_connections(&mut self) {
        let held: Vec<(String, BackendConn)> = self.tx_conns.drain().collect();
        for (node_name, mut conn) in held {
            if let Err(e) = conn.rollback().await {
                warn!(
                    session_id = self.id,
                    node = %node_name,
                    error = %e,
                    "Rollback on disconnect failed"
                );
            }
            if conn.is_usable() {
                if let Some(node) = self.proxy.node(&node_name) {
                    node.release(conn).await;
                }
            }
        }
        self.state.end_transaction();
    }

    pub(crate) async fn write_ok<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        result: Option<&QueryResult>,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut ok = OkPacket::with_status(self.state.status);
        if let Some(result) = result {
            ok.affected_rows = result.affected_rows;
            ok.last_insert_id = result.last_insert_id;
            ok.warnings = result.warnings;
        }
        client
            .send(ok.encode(1, self.state.capability_flags))
            .await?;
        Ok(())
    }

    pub(crate) async fn write_err<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        err: ErrPacket,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        client
            .send(err.encode(1, self.state.capability_flags))
            .await?;
        Ok(())
    }

    /// Relay a materialized result set, renumbering sequence ids: column
    /// count, column definitions, EOF, rows, EOF.
    pub(crate) async fn write_resultset<C>(
        &mut self,
        client: &mut Framed<C, PacketCodec>,
        rs: &Resultset,
    ) -> Result<(), SessionError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let caps = self.state.capability_flags;
        let mut seq: u8 = 1;

        let mut header = BytesMut::new();
        put_lenc_int(&mut header, rs.column_count);
        client.feed(Packet::new(seq, header.freeze())).await?;
        seq = seq.wrapping_add(1);

        for column in &rs.columns {
            client.feed(Packet::new(seq, column.clone())).await?;
            seq = seq.wrapping_add(1);
        }

        client
            .feed(EofPacket::with_status(self.state.status).encode(seq, caps))
            .await?;
        seq = seq.wrapping_add(1);

        for row in &rs.rows {
            client.feed(Packet::new(seq, row.clone())).await?;
            seq = seq.wrapping_add(1);
        }

        client
            .feed(EofPacket::with_status(self.state.status).encode(seq, caps))
            .await?;
        client.flush().await?;
        Ok(())
    }
}

/// Session-fatal errors. Dispatch errors are intercepted in `handle_query`
/// and answered as MySQL error packets instead of tearing the session down.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Trim SQL for log lines.
fn truncate_sql(sql: &str, max_len: usize) -> &str {
    match sql.char_indices().nth(max_len) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}
