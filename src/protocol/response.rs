//! Reply-side packet types: OK, ERR, EOF, and materialized result sets.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::packet::{capabilities::*, Packet};

/// Server status bits carried in OK and EOF packets.
pub mod status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Error codes the proxy emits itself.
pub mod error_codes {
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_UNKNOWN_ERROR: u16 = 1105;
}

/// OK packet (0x00 header).
#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn with_status(status_flags: u16) -> Self {
        Self {
            status_flags,
            ..Self::default()
        }
    }

    pub fn encode(&self, sequence_id: u8, caps: u32) -> Packet {
        let mut buf = BytesMut::new();
        buf.put_u8(0x00);
        put_lenc_int(&mut buf, self.affected_rows);
        put_lenc_int(&mut buf, self.last_insert_id);
        if caps & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(self.status_flags);
            buf.put_u16_le(self.warnings);
        }
        Packet::new(sequence_id, buf.freeze())
    }

    pub fn parse(payload: &[u8], caps: u32) -> Option<Self> {
        if payload.first() != Some(&0x00) {
            return None;
        }
        let mut buf = &payload[1..];
        let affected_rows = get_lenc_int(&mut buf)?;
        let last_insert_id = get_lenc_int(&mut buf)?;
        let (status_flags, warnings) = if caps & CLIENT_PROTOCOL_41 != 0 && buf.len() >= 4 {
            (buf.get_u16_le(), buf.get_u16_le())
        } else {
            (0, 0)
        };
        Some(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
        })
    }
}

/// ERR packet (0xFF header).
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: &str) -> Self {
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            error_message: error_message.to_string(),
        }
    }

    /// The shape every dispatcher-originated error takes on the wire.
    pub fn unknown(message: &str) -> Self {
        Self::new(error_codes::ER_UNKNOWN_ERROR, "HY000", message)
    }

    pub fn encode(&self, sequence_id: u8, caps: u32) -> Packet {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFF);
        buf.put_u16_le(self.error_code);
        if caps & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u8(b'#');
            buf.extend_from_slice(self.sql_state.as_bytes());
        }
        buf.extend_from_slice(self.error_message.as_bytes());
        Packet::new(sequence_id, buf.freeze())
    }

    pub fn parse(payload: &[u8], caps: u32) -> Option<Self> {
        if payload.first() != Some(&0xFF) || payload.len() < 3 {
            return None;
        }
        let mut buf = &payload[1..];
        let error_code = buf.get_u16_le();

        if caps & CLIENT_PROTOCOL_41 != 0 && buf.first() == Some(&b'#') && buf.len() >= 6 {
            let sql_state = String::from_utf8_lossy(&buf[1..6]).to_string();
            buf.advance(6);
            return Some(Self {
                error_code,
                sql_state,
                error_message: String::from_utf8_lossy(buf).to_string(),
            });
        }

        Some(Self {
            error_code,
            sql_state: "HY000".to_string(),
            error_message: String::from_utf8_lossy(buf).to_string(),
        })
    }
}

impl std::fmt::Display for ErrPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ERROR {} ({}): {}",
            self.error_code, self.sql_state, self.error_message
        )
    }
}

/// EOF packet (0xFE header, classic protocol).
#[derive(Debug, Clone, Default)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn with_status(status_flags: u16) -> Self {
        Self {
            warnings: 0,
            status_flags,
        }
    }

    pub fn encode(&self, sequence_id: u8, caps: u32) -> Packet {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFE);
        if caps & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(self.warnings);
            buf.put_u16_le(self.status_flags);
        }
        Packet::new(sequence_id, buf.freeze())
    }

    pub fn parse(payload: &[u8], caps: u32) -> Option<Self> {
        if payload.first() != Some(&0xFE) || payload.len() >= 9 {
            return None;
        }
        if caps & CLIENT_PROTOCOL_41 != 0 && payload.len() >= 5 {
            let mut buf = &payload[1..];
            let warnings = buf.get_u16_le();
            let status_flags = buf.get_u16_le();
            Some(Self {
                warnings,
                status_flags,
            })
        } else {
            Some(Self::default())
        }
    }
}

pub fn is_ok_packet(payload: &Bytes) -> bool {
    payload.first() == Some(&0x00)
}

pub fn is_err_packet(payload: &Bytes) -> bool {
    payload.first() == Some(&0xFF)
}

pub fn is_eof_packet(payload: &Bytes) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

/// One backend answer to a statement: either a plain OK (affected rows,
/// insert id) or a row-bearing result set. A single COM_QUERY can produce
/// several of these when SERVER_MORE_RESULTS_EXISTS is set.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub resultset: Option<Resultset>,
}

impl QueryResult {
    pub fn from_ok(ok: &OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            status_flags: ok.status_flags,
            warnings: ok.warnings,
            resultset: None,
        }
    }
}

/// A materialized result set: raw column-definition payloads and raw row
/// payloads, exactly as the backend sent them. The proxy renumbers sequence
/// ids when relaying them to the client.
#[derive(Debug, Clone)]
pub struct Resultset {
    pub column_count: u64,
    pub columns: Vec<Bytes>,
    pub rows: Vec<Bytes>,
}

/// Write a length-encoded integer.
pub fn put_lenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65536 {
        buf.put_u8(0xFC);
        buf.put_u16_le(value as u16);
    } else if value < 16_777_216 {
        buf.put_u8(0xFD);
        buf.put_u8((value & 0xFF) as u8);
        buf.put_u8(((value >> 8) & 0xFF) as u8);
        buf.put_u8(((value >> 16) & 0xFF) as u8);
    } else {
        buf.put_u8(0xFE);
        buf.put_u64_le(value);
    }
}

/// Read a length-encoded integer, advancing the slice.
pub fn get_lenc_int(buf: &mut &[u8]) -> Option<u64> {
    let first = *buf.first()?;
    match first {
        0..=0xFA => {
            buf.advance(1);
            Some(first as u64)
        }
        0xFC if buf.len() >= 3 => {
            buf.advance(1);
            Some(buf.get_u16_le() as u64)
        }
        0xFD if buf.len() >= 4 => {
            buf.advance(1);
            let v = buf[0] as u64 | ((buf[1] as u64) << 8) | ((buf[2] as u64) << 16);
            buf.advance(3);
            Some(v)
        }
        0xFE if buf.len() >= 9 => {
            buf.advance(1);
            Some(buf.get_u64_le())
        }
        _ => None,
    }
}
