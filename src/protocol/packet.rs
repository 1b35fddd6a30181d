use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// MySQL packet header: 3 bytes payload length + 1 byte sequence id.
pub const PACKET_HEADER_SIZE: usize = 4;

/// One MySQL wire packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Build a COM_* command packet. Commands always start a new sequence.
    pub fn command(cmd: u8, data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(1 + data.len());
        payload.put_u8(cmd);
        payload.extend_from_slice(data);
        Self::new(0, payload.freeze())
    }

    fn write_to(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        dst.put_u8((len & 0xFF) as u8);
        dst.put_u8(((len >> 8) & 0xFF) as u8);
        dst.put_u8(((len >> 16) & 0xFF) as u8);
        dst.put_u8(self.sequence_id);
        dst.extend_from_slice(&self.payload);
    }

    fn read_from(src: &mut BytesMut) -> Option<Self> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }

        let len = src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
        if src.len() < PACKET_HEADER_SIZE + len {
            return None;
        }

        let sequence_id = src[3];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Some(Self {
            sequence_id,
            payload,
        })
    }
}

/// Codec turning a raw stream into MySQL packets, for `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Packet::read_from(src))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}

/// Command bytes the proxy distinguishes. Everything else is answered with
/// "command not supported".
pub mod command {
    pub const COM_QUIT: u8 = 0x01;
    pub const COM_INIT_DB: u8 = 0x02;
    pub const COM_QUERY: u8 = 0x03;
    pub const COM_PING: u8 = 0x0e;
    pub const COM_RESET_CONNECTION: u8 = 0x1f;
}

/// MySQL capability flags.
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities the proxy advertises and negotiates.
    ///
    /// CLIENT_MULTI_STATEMENTS stays off: routing inspects exactly one
    /// statement per COM_QUERY. CLIENT_DEPRECATE_EOF stays off as well; some
    /// backends advertise it and then send EOF packets anyway, so the proxy
    /// pins the classic EOF-terminated result format on both sides.
    pub const DEFAULT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_roundtrip() {
        let packet = Packet::new(3, &b"hello"[..]);
        let mut buf = BytesMut::new();
        packet.write_to(&mut buf);

        let decoded = Packet::read_from(&mut buf).unwrap();
        assert_eq!(decoded.sequence_id, 3);
        assert_eq!(&decoded.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_payload() {
        let packet = Packet::new(0, &b"abcdef"[..]);
        let mut buf = BytesMut::new();
        packet.write_to(&mut buf);

        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert!(Packet::read_from(&mut partial).is_none());
        // nothing consumed until the payload is complete
        assert_eq!(partial.len(), buf.len() - 1);
    }

    #[test]
    fn command_packet_layout() {
        let packet = Packet::command(command::COM_QUERY, b"SELECT 1");
        assert_eq!(packet.sequence_id, 0);
        assert_eq!(packet.payload[0], 0x03);
        assert_eq!(&packet.payload[1..], b"SELECT 1");
    }
}
