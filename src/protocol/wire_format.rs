//! Wire format encoding and decoding.
//!
//! Implements the 12-byte header format:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Magic    │ Opcode   │ Length   │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │
//! │ \0REQ/RES│ uint32 BE│ uint32 BE│
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{GearmanError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Default maximum payload size (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Magic tag for client/worker → server packets.
pub const REQ_MAGIC: [u8; 4] = *b"\0REQ";

/// Magic tag for server → client/worker packets.
pub const RES_MAGIC: [u8; 4] = *b"\0RES";

/// Direction of a packet, as encoded in its magic tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// `\0REQ`
    Request,
    /// `\0RES`
    Response,
}

impl Magic {
    /// The 4 magic bytes.
    pub fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Request => REQ_MAGIC,
            Magic::Response => RES_MAGIC,
        }
    }

    /// Parse the 4 magic bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        match bytes {
            REQ_MAGIC => Some(Magic::Request),
            RES_MAGIC => Some(Magic::Response),
            _ => None,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw magic tag. Checked by [`Header::validate`].
    pub magic: [u8; 4],
    /// Command opcode.
    pub opcode: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(magic: Magic, opcode: u32, payload_length: u32) -> Self {
        Self {
            magic: magic.bytes(),
            opcode,
            payload_length,
        }
    }

    /// Header for a payload of `len` bytes. Lengths past `u32::MAX` cannot
    /// be framed and fail with `MalformedHeader`.
    pub fn for_payload(magic: Magic, opcode: u32, len: usize) -> Result<Self> {
        let payload_length = u32::try_from(len).map_err(|_| {
            GearmanError::MalformedHeader(format!("payload of {len} bytes does not fit a frame"))
        })?;
        Ok(Self::new(magic, opcode, payload_length))
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use gearman_client::protocol::{Header, Magic};
    ///
    /// let header = Header::new(Magic::Request, 7, 100);
    /// let bytes = header.encode();
    /// assert_eq!(&bytes[..4], b"\0REQ");
    /// assert_eq!(bytes.len(), 12);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.opcode.to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short. No validation is done here.
    ///
    /// # Example
    ///
    /// ```
    /// use gearman_client::protocol::Header;
    ///
    /// let bytes = [0, b'R', b'E', b'S', 0, 0, 0, 8, 0, 0, 0, 5];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.opcode, 8);
    /// assert_eq!(header.payload_length, 5);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: [buf[0], buf[1], buf[2], buf[3]],
            opcode: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            payload_length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Validate the magic tag and payload length, returning the direction.
    pub fn validate(&self, max_payload_size: u32) -> Result<Magic> {
        let magic = Magic::from_bytes(self.magic).ok_or_else(|| {
            GearmanError::MalformedHeader(format!("bad magic tag {:02x?}", self.magic))
        })?;

        if self.payload_length > max_payload_size {
            return Err(GearmanError::MalformedHeader(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(magic)
    }
}
