//! Connection-phase packets and mysql_native_password scrambling.

use bytes::{Buf, BufMut, BytesMut};
use sha1::{Digest, Sha1};

use super::packet::{capabilities::*, Packet};

const SERVER_VERSION: &str = "5.7.31-janus";
const UTF8_GENERAL_CI: u8 = 0x21;

/// Initial handshake (server -> client). The proxy sends one to every client
/// and receives one from every backend.
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub scramble_head: [u8; 8],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub scramble_tail: Vec<u8>,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    /// Handshake the proxy presents to a connecting client.
    pub fn for_client(connection_id: u32) -> Self {
        use rand::RngCore;

        let mut scramble_head = [0u8; 8];
        let mut scramble_tail = vec![0u8; 12];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut scramble_head);
        rng.fill_bytes(&mut scramble_tail);

        Self {
            protocol_version: 10,
            server_version: SERVER_VERSION.to_string(),
            connection_id,
            scramble_head,
            capability_flags: DEFAULT_CAPABILITIES,
            character_set: UTF8_GENERAL_CI,
            status_flags: 0x0002,
            scramble_tail,
            auth_plugin_name: "mysql_native_password".to_string(),
        }
    }

    /// The full 20-byte scramble the auth response is computed against.
    pub fn scramble(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(20);
        data.extend_from_slice(&self.scramble_head);
        data.extend_from_slice(&self.scramble_tail);
        data
    }

    pub fn encode(&self) -> Packet {
        let mut buf = BytesMut::new();

        buf.put_u8(self.protocol_version);
        buf.extend_from_slice(self.server_version.as_bytes());
        buf.put_u8(0);
        buf.put_u32_le(self.connection_id);
        buf.extend_from_slice(&self.scramble_head);
        buf.put_u8(0); // filler
        buf.put_u16_le((self.capability_flags & 0xFFFF) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le(((self.capability_flags >> 16) & 0xFFFF) as u16);

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_u8((self.scramble_head.len() + self.scramble_tail.len() + 1) as u8);
        } else {
            buf.put_u8(0);
        }

        buf.extend_from_slice(&[0u8; 10]); // reserved

        if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            buf.extend_from_slice(&self.scramble_tail);
            buf.put_u8(0);
        }

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.extend_from_slice(self.auth_plugin_name.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(0, buf.freeze())
    }

    /// Parse the handshake a backend server sent us.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 32 {
            return None;
        }

        let mut buf = payload;
        let protocol_version = buf.get_u8();

        let null_pos = buf.iter().position(|&b| b == 0)?;
        let server_version = String::from_utf8_lossy(&buf[..null_pos]).to_string();
        buf.advance(null_pos + 1);

        // fixed-size block: connection id through the reserved filler
        if buf.len() < 31 {
            return None;
        }

        let connection_id = buf.get_u32_le();

        let mut scramble_head = [0u8; 8];
        scramble_head.copy_from_slice(&buf[..8]);
        buf.advance(8);

        buf.advance(1); // filler

        let caps_lower = buf.get_u16_le() as u32;
        let character_set = buf.get_u8();
        let status_flags = buf.get_u16_le();
        let caps_upper = buf.get_u16_le() as u32;
        let capability_flags = caps_lower | (caps_upper << 16);

        let scramble_len = buf.get_u8();
        buf.advance(10); // reserved

        let mut scramble_tail = Vec::new();
        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = std::cmp::max(13, (scramble_len as usize).saturating_sub(8)).min(buf.len());
            let data_len = buf.iter().take(len).position(|&b| b == 0).unwrap_or(len);
            scramble_tail.extend_from_slice(&buf[..data_len]);
            buf.advance(len);
        }

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
            let null_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..null_pos]).to_string()
        } else {
            "mysql_native_password".to_string()
        };

        Some(Self {
            protocol_version,
            server_version,
            connection_id,
            scramble_head,
            capability_flags,
            character_set,
            status_flags,
            scramble_tail,
            auth_plugin_name,
        })
    }
}

/// Handshake response (client -> server).
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: String,
}

impl HandshakeResponse {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 32 {
            return None;
        }

        let mut buf = payload;
        let capability_flags = buf.get_u32_le();
        let max_packet_size = buf.get_u32_le();
        let character_set = buf.get_u8();
        buf.advance(23); // reserved

        let null_pos = buf.iter().position(|&b| b == 0)?;
        let username = String::from_utf8_lossy(&buf[..null_pos]).to_string();
        buf.advance(null_pos + 1);

        let auth_response = if capability_flags
            & (CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA | CLIENT_SECURE_CONNECTION)
            != 0
        {
            if buf.is_empty() {
                return None;
            }
            let len = buf.get_u8() as usize;
            if buf.len() < len {
                return None;
            }
            let data = buf[..len].to_vec();
            buf.advance(len);
            data
        } else {
            let null_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let data = buf[..null_pos].to_vec();
            buf.advance((null_pos + 1).min(buf.len()));
            data
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && !buf.is_empty() {
            let null_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let db = String::from_utf8_lossy(&buf[..null_pos]).to_string();
            buf.advance((null_pos + 1).min(buf.len()));
            (!db.is_empty()).then_some(db)
        } else {
            None
        };

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
            let null_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..null_pos]).to_string()
        } else {
            "mysql_native_password".to_string()
        };

        Some(Self {
            capability_flags,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }

    /// Encode the response the proxy sends when authenticating to a backend.
    pub fn encode(&self, sequence_id: u8) -> Packet {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.capability_flags);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.extend_from_slice(&[0u8; 23]);

        buf.extend_from_slice(self.username.as_bytes());
        buf.put_u8(0);

        if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            buf.put_u8(self.auth_response.len() as u8);
            buf.extend_from_slice(&self.auth_response);
        } else {
            buf.extend_from_slice(&self.auth_response);
            buf.put_u8(0);
        }

        if self.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(ref db) = self.database {
                buf.extend_from_slice(db.as_bytes());
            }
            buf.put_u8(0);
        }

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.extend_from_slice(self.auth_plugin_name.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(sequence_id, buf.freeze())
    }
}

/// mysql_native_password: SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password))).
pub fn scramble_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1 = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(stage1);
    let stage2 = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_handshake_parses_back() {
        let hs = InitialHandshake::for_client(7);
        let packet = hs.encode();
        let parsed = InitialHandshake::parse(&packet.payload).unwrap();
        assert_eq!(parsed.connection_id, 7);
        assert_eq!(parsed.server_version, SERVER_VERSION);
        assert_eq!(parsed.scramble(), hs.scramble());
        assert_eq!(parsed.auth_plugin_name, "mysql_native_password");
    }

    #[test]
    fn scramble_empty_password_is_empty() {
        assert!(scramble_password("", &[1, 2, 3]).is_empty());
    }

    #[test]
    fn scramble_is_deterministic() {
        let scramble: Vec<u8> = (0..20).collect();
        let a = scramble_password("secret", &scramble);
        let b = scramble_password("secret", &scramble);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert_ne!(a, scramble_password("other", &scramble));
    }

    #[test]
    fn handshake_response_roundtrip() {
        let response = HandshakeResponse {
            capability_flags: DEFAULT_CAPABILITIES,
            max_packet_size: 16 * 1024 * 1024,
            character_set: UTF8_GENERAL_CI,
            username: "app".to_string(),
            auth_response: vec![0xAA; 20],
            database: Some("orders".to_string()),
            auth_plugin_name: "mysql_native_password".to_string(),
        };
        let packet = response.encode(1);
        let parsed = HandshakeResponse::parse(&packet.payload).unwrap();
        assert_eq!(parsed.username, "app");
        assert_eq!(parsed.database.as_deref(), Some("orders"));
        assert_eq!(parsed.auth_response, vec![0xAA; 20]);
    }
}
