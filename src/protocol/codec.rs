//! Packet codec: command encoding and buffered decoding.
//!
//! Encoding looks the command up by name and NUL-joins the given fields in
//! table order. Decoding uses `bytes::BytesMut` and a small state machine to
//! handle fragmented reads:
//! - `WaitingForHeader`: Need at least 12 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gearman_client::protocol::{Codec, CommandTable};
//!
//! let mut codec = Codec::new(Arc::new(CommandTable::standard()));
//! let frame = codec.encode("echo_req", &[("text", b"ping")]).unwrap();
//!
//! codec.push(&frame);
//! let packet = codec.decode().unwrap().unwrap();
//! assert_eq!(packet.name(), "echo_req");
//! assert_eq!(&packet.field("text").unwrap()[..], b"ping");
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::command::{CommandSpec, CommandTable};
use super::packet::Packet;
use super::wire_format::{Header, Magic, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::{GearmanError, Result};

/// Text used when the server sends an `error` packet with an empty message.
const UNKNOWN_ERROR_TEXT: &str = "Unknown error; see error code.";

/// State machine for packet parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 12 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload {
        magic: Magic,
        command: &'static CommandSpec,
        remaining: u32,
    },
}

/// Encoder plus incoming-byte buffer for one connection.
pub struct Codec {
    table: Arc<CommandTable>,
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
}

impl Codec {
    /// Create a codec with default settings (max payload: 1GB).
    pub fn new(table: Arc<CommandTable>) -> Self {
        Self::with_max_payload(table, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with custom max payload size.
    pub fn with_max_payload(table: Arc<CommandTable>, max_payload_size: u32) -> Self {
        Self {
            table,
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// The command table this codec encodes against.
    pub fn table(&self) -> &Arc<CommandTable> {
        &self.table
    }

    /// Encode a request packet.
    ///
    /// Fields not named in the command's field list are ignored; fields the
    /// command expects but the caller omitted are skipped.
    pub fn encode(&self, command: &str, fields: &[(&str, &[u8])]) -> Result<Bytes> {
        self.encode_as(Magic::Request, command, fields)
    }

    /// Encode a packet with an explicit magic tag.
    pub fn encode_as(&self, magic: Magic, command: &str, fields: &[(&str, &[u8])]) -> Result<Bytes> {
        let spec = self
            .table
            .by_name(command)
            .ok_or_else(|| GearmanError::UnknownCommand(command.to_string()))?;

        let values: Vec<&[u8]> = spec
            .fields
            .iter()
            .filter_map(|name| fields.iter().find(|(k, _)| k == name).map(|(_, v)| *v))
            .collect();
        let payload_len = values.iter().map(|v| v.len()).sum::<usize>() + values.len().saturating_sub(1);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_len);
        let header = Header::for_payload(magic, spec.opcode, payload_len)?;
        buf.extend_from_slice(&header.encode());
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                buf.extend_from_slice(&[0]);
            }
            buf.extend_from_slice(value);
        }

        Ok(buf.freeze())
    }

    /// Append received bytes without decoding.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one packet from the buffered bytes.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` if a complete packet was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(ServerError)` if the packet was an `error` response (consumed)
    /// - `Err(...)` on a framing violation; the buffer is cleared
    pub fn decode(&mut self) -> Result<Option<Packet>> {
        match self.try_decode() {
            Err(e @ GearmanError::ServerError { .. }) => Err(e),
            Err(e) => {
                self.clear();
                Err(e)
            }
            ok => ok,
        }
    }

    fn try_decode(&mut self) -> Result<Option<Packet>> {
        match self.state {
            State::WaitingForHeader => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };

                let magic = header.validate(self.max_payload_size)?;
                let command = self
                    .table
                    .by_opcode(header.opcode)
                    .ok_or(GearmanError::UnknownOpcode(header.opcode))?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                self.state = State::WaitingForPayload {
                    magic,
                    command,
                    remaining: header.payload_length,
                };

                self.try_decode()
            }

            State::WaitingForPayload {
                magic,
                command,
                remaining,
            } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForHeader;

                let packet = Packet::new(magic, command, split_fields(command, payload));
                if packet.is("error") {
                    return Err(server_error(&packet));
                }
                Ok(Some(packet))
            }
        }
    }

    /// True if a complete packet is buffered and `decode` would not return `None`.
    pub fn has_complete_packet(&self) -> bool {
        match &self.state {
            State::WaitingForHeader => match Header::decode(&self.buffer) {
                Some(header) => self.buffer.len() - HEADER_SIZE >= header.payload_length as usize,
                None => false,
            },
            State::WaitingForPayload { remaining, .. } => self.buffer.len() >= *remaining as usize,
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

/// Split a payload on NUL into exactly `command.fields.len()` values.
///
/// The last field keeps any embedded NUL bytes; missing trailing fields are empty.
fn split_fields(command: &CommandSpec, payload: Bytes) -> Vec<Bytes> {
    let count = command.fields.len();
    let mut fields = Vec::with_capacity(count);
    if count == 0 {
        return fields;
    }

    let mut rest = payload;
    while fields.len() + 1 < count {
        match rest.iter().position(|&b| b == 0) {
            Some(pos) => {
                let value = rest.split_to(pos);
                let _ = rest.split_to(1);
                fields.push(value);
            }
            None => break,
        }
    }
    fields.push(rest);
    fields.resize(count, Bytes::new());
    fields
}

fn server_error(packet: &Packet) -> GearmanError {
    let code = packet.field_str("err_code").unwrap_or_default().into_owned();
    let text = match packet.field_str("err_text") {
        Some(text) if !text.is_empty() => text.into_owned(),
        _ => UNKNOWN_ERROR_TEXT.to_string(),
    };
    GearmanError::ServerError { code, text }
}
