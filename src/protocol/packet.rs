//! Decoded packet with named field access.
//!
//! Field values are raw bytes (`bytes::Bytes`) and are never interpreted as
//! text by the codec. Helpers are provided for the fields that are textual by
//! convention (handles, numbers).

use std::borrow::Cow;

use bytes::Bytes;

use super::command::CommandSpec;
use super::wire_format::{Header, Magic, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Direction tag the packet carried.
    pub magic: Magic,
    /// Command this packet belongs to.
    pub command: &'static CommandSpec,
    /// Field values, same count and order as `command.fields`.
    pub fields: Vec<Bytes>,
}

impl Packet {
    /// Create a packet from parts.
    pub fn new(magic: Magic, command: &'static CommandSpec, fields: Vec<Bytes>) -> Self {
        Self {
            magic,
            command,
            fields,
        }
    }

    /// Command name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.command.name
    }

    /// Command opcode.
    #[inline]
    pub fn opcode(&self) -> u32 {
        self.command.opcode
    }

    /// Check the command name.
    #[inline]
    pub fn is(&self, name: &str) -> bool {
        self.command.name == name
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&Bytes> {
        self.command
            .fields
            .iter()
            .position(|f| *f == name)
            .and_then(|i| self.fields.get(i))
    }

    /// Get a field as text (lossy for non-UTF-8 bytes).
    pub fn field_str(&self, name: &str) -> Option<Cow<'_, str>> {
        self.field(name).map(|b| String::from_utf8_lossy(b))
    }

    /// Get a field as an unsigned decimal number.
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.field_str(name)?.trim().parse().ok()
    }
}

/// Build a complete frame as a single byte vector.
///
/// `payload` must already be the NUL-joined field values.
pub fn build_frame(magic: Magic, opcode: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let header = Header::for_payload(magic, opcode, payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}
