use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::config::BackendConfig;
use crate::protocol::{
    capabilities, command, is_eof_packet, is_err_packet, is_ok_packet, response::get_lenc_int,
    scramble_password, status, EofPacket, ErrPacket, HandshakeResponse, InitialHandshake,
    OkPacket, Packet, PacketCodec, QueryResult, Resultset,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    InUse,
    Closed,
}

/// One authenticated connection to a backend MySQL server.
pub struct BackendConn {
    framed: Framed<TcpStream, PacketCodec>,
    state: ConnState,
    created_at: Instant,
    last_used_at: Instant,
    capabilities: u32,
    addr: String,
}

impl BackendConn {
    /// Connect and authenticate against a backend.
    pub async fn connect(config: &BackendConfig) -> Result<Self, ConnectionError> {
        let addr = config.addr();
        debug!(addr = %addr, "Connecting to backend");

        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to connect to backend");
            ConnectionError::Connect(e.to_string())
        })?;

        let mut framed = Framed::new(stream, PacketCodec);

        let handshake_packet = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let handshake = InitialHandshake::parse(&handshake_packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("invalid backend handshake".into()))?;

        let auth_response = scramble_password(&config.password, &handshake.scramble());

        let mut caps = capabilities::DEFAULT_CAPABILITIES & handshake.capability_flags;
        if config.database.is_some() {
            caps |= capabilities::CLIENT_CONNECT_WITH_DB;
        }

        let response = HandshakeResponse {
            capability_flags: caps,
            max_packet_size: 16 * 1024 * 1024,
            character_set: handshake.character_set,
            username: config.user.clone(),
            auth_response,
            database: config.database.clone(),
            auth_plugin_name: handshake.auth_plugin_name.clone(),
        };

        framed
            .send(response.encode(1))
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let reply = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if is_err_packet(&reply.payload) {
            let err = ErrPacket::parse(&reply.payload, caps)
                .unwrap_or_else(|| ErrPacket::new(1045, "28000", "Access denied"));
            error!(addr = %addr, error = %err, "Backend authentication failed");
            return Err(ConnectionError::Auth(err.error_message));
        }
        if !is_ok_packet(&reply.payload) {
            return Err(ConnectionError::Protocol(
                "expected OK after authentication".into(),
            ));
        }

        debug!(addr = %addr, server_version = %handshake.server_version, "Backend ready");

        let now = Instant::now();
        Ok(Self {
            framed,
            state: ConnState::Idle,
            created_at: now,
            last_used_at: now,
            capabilities: caps,
            addr,
        })
    }

    /// Run one statement and materialize every result the backend answers
    /// with. A backend ERR packet surfaces as `ConnectionError::Backend` and
    /// leaves the connection usable; transport failures close it.
    pub async fn execute(&mut self, sql: &str) -> Result<Vec<QueryResult>, ConnectionError> {
        self.send(Packet::command(command::COM_QUERY, sql.as_bytes()))
            .await?;
        self.read_results().await
    }

    pub async fn begin(&mut self) -> Result<(), ConnectionError> {
        self.execute("BEGIN").await.map(|_| ())
    }

    pub async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.execute("COMMIT").await.map(|_| ())
    }

    pub async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// COM_RESET_CONNECTION before the connection re-enters the idle pool,
    /// clearing session variables and temp state left by the last borrower.
    pub async fn reset(&mut self) -> bool {
        let packet = Packet::command(command::COM_RESET_CONNECTION, &[]);
        if self.send(packet).await.is_err() {
            return false;
        }
        match self.recv().await {
            Ok(reply) => is_ok_packet(&reply.payload),
            Err(_) => false,
        }
    }

    async fn read_results(&mut self) -> Result<Vec<QueryResult>, ConnectionError> {
        let mut results = Vec::new();
        loop {
            let first = self.recv().await?;

            if is_err_packet(&first.payload) {
                let err = ErrPacket::parse(&first.payload, self.capabilities)
                    .unwrap_or_else(|| ErrPacket::unknown("malformed backend error packet"));
                return Err(ConnectionError::Backend(err));
            }

            let status_flags = if is_ok_packet(&first.payload) {
                let ok = OkPacket::parse(&first.payload, self.capabilities).ok_or_else(|| {
                    ConnectionError::Protocol("malformed OK packet".into())
                })?;
                results.push(QueryResult::from_ok(&ok));
                ok.status_flags
            } else {
                let result = self.read_resultset(&first).await?;
                let status_flags = result.status_flags;
                results.push(result);
                status_flags
            };

            if status_flags & status::SERVER_MORE_RESULTS_EXISTS == 0 {
                return Ok(results);
            }
        }
    }

    async fn read_resultset(&mut self, first: &Packet) -> Result<QueryResult, ConnectionError> {
        let mut header = &first.payload[..];
        let column_count = get_lenc_int(&mut header)
            .ok_or_else(|| ConnectionError::Protocol("malformed column count".into()))?;

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let packet = self.recv().await?;
            columns.push(packet.payload);
        }

        // CLIENT_DEPRECATE_EOF is never negotiated, so an EOF always follows
        // the column definitions.
        let eof = self.recv().await?;
        if !is_eof_packet(&eof.payload) {
            return Err(ConnectionError::Protocol(
                "missing EOF after column definitions".into(),
            ));
        }

        let mut rows = Vec::new();
        let status_flags = loop {
            let packet = self.recv().await?;
            if is_err_packet(&packet.payload) {
                let err = ErrPacket::parse(&packet.payload, self.capabilities)
                    .unwrap_or_else(|| ErrPacket::unknown("malformed backend error packet"));
                return Err(ConnectionError::Backend(err));
            }
            if is_eof_packet(&packet.payload) {
                let eof = EofPacket::parse(&packet.payload, self.capabilities).unwrap_or_default();
                break eof.status_flags;
            }
            rows.push(packet.payload);
        };

        Ok(QueryResult {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags,
            warnings: 0,
            resultset: Some(Resultset {
                column_count,
                columns,
                rows,
            }),
        })
    }

    pub async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        match self.framed.send(packet).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ConnState::Closed;
                Err(ConnectionError::Io(e.to_string()))
            }
        }
    }

    pub async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.state = ConnState::Closed;
                Err(ConnectionError::Io(e.to_string()))
            }
            None => {
                self.state = ConnState::Closed;
                Err(ConnectionError::Disconnected)
            }
        }
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    pub fn is_idle_too_long(&self, max_idle: Duration) -> bool {
        self.last_used_at.elapsed() > max_idle
    }

    pub fn mark_in_use(&mut self) {
        self.state = ConnState::InUse;
        self.last_used_at = Instant::now();
    }

    pub fn mark_idle(&mut self) {
        self.state = ConnState::Idle;
        self.last_used_at = Instant::now();
    }

    pub fn is_usable(&self) -> bool {
        self.state != ConnState::Closed
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend answered the statement with its own error packet.
    #[error("{0}")]
    Backend(ErrPacket),

    #[error("connection disconnected")]
    Disconnected,
}
