//! Protocol module - command table, wire format and packet codec.
//!
//! This module implements the binary protocol:
//! - Command table with name and opcode lookups
//! - 12-byte header encoding/decoding
//! - Codec for encoding commands and decoding buffered reads
//! - Packet struct with named field access

mod codec;
mod command;
mod packet;
mod wire_format;

pub use codec::Codec;
pub use command::{opcode, CommandSpec, CommandTable};
pub use packet::{build_frame, Packet};
pub use wire_format::{
    Header, Magic, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, REQ_MAGIC, RES_MAGIC,
};
