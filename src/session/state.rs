use crate::protocol::status::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};
use crate::protocol::QueryResult;

/// Per-session mutable state. Owned exclusively by the session task.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Client username.
    pub username: String,
    /// Current database.
    pub database: Option<String>,
    /// Client capability flags.
    pub capability_flags: u32,
    /// Whether the client is in a transaction.
    pub in_transaction: bool,
    /// Set when a backend error occurred inside the transaction; the client
    /// is expected to roll back.
    pub tx_aborted: bool,
    /// Insert id of the last executed statement.
    pub last_insert_id: u64,
    /// Affected rows of the last executed statement.
    pub affected_rows: u64,
    /// Proxy-assigned status bits echoed in OK/EOF packets.
    pub status: u16,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            username: String::new(),
            database: None,
            capability_flags: 0,
            in_transaction: false,
            tx_aborted: false,
            last_insert_id: 0,
            affected_rows: 0,
            status: SERVER_STATUS_AUTOCOMMIT,
        }
    }

    pub fn set_from_handshake(&mut self, username: String, database: Option<String>, capabilities: u32) {
        self.username = username;
        self.database = database;
        self.capability_flags = capabilities;
    }

    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
        self.tx_aborted = false;
        self.status |= SERVER_STATUS_IN_TRANS;
    }

    pub fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.tx_aborted = false;
        self.status &= !SERVER_STATUS_IN_TRANS;
    }

    /// Mirror the first result of the last statement, as clients observe it
    /// through LAST_INSERT_ID() and ROW_COUNT().
    pub fn record_result(&mut self, result: &QueryResult) {
        self.last_insert_id = result.last_insert_id;
        self.affected_rows = result.affected_rows;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
