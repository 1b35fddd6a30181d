pub mod handshake;
pub mod packet;
pub mod response;

pub use handshake::{scramble_password, HandshakeResponse, InitialHandshake};
pub use packet::{capabilities, command, Packet, PacketCodec};
pub use response::{
    error_codes, is_eof_packet, is_err_packet, is_ok_packet, status, EofPacket, ErrPacket,
    OkPacket, QueryResult, Resultset,
};
