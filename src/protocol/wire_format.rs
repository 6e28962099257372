//! Wire format encoding and decoding.
//!
//! Every frame is a run of little-endian 32-bit words:
//! ```text
//! ┌──────────┬─────────────┬──────────────────────────┐
//! │ ID       │ Byte length │ Data words               │
//! │ uint32 LE│ uint32 LE   │ byte_length / 4 × u32 LE │
//! └──────────┴─────────────┴──────────────────────────┘
//! ```
//!
//! The length is carried in bytes even though every transfer is a whole
//! number of words.

use crate::error::{BridgeError, Result};

/// Header size in bytes (id + byte length).
pub const HEADER_SIZE: usize = 8;

/// Size of one data word on the wire.
pub const WORD_SIZE: usize = 4;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Command identifiers spoken by the simulator.
pub mod commands {
    /// Liveness ping. Sent by both sides.
    pub const HEARTBEAT: u32 = 0x0;
    /// Simulator is up and ready to accept memory requests.
    pub const HELLO: u32 = 0x1;
    /// Simulator is shutting down.
    pub const GOODBYE: u32 = 0x2;
    /// Simulation time tick.
    pub const TICK: u32 = 0x3;
    /// Host → simulator: `[address, byte_length, sequence]`.
    pub const MEM_READ_REQ: u32 = 0x401;
    /// Simulator → host: `[sequence, payload...]`.
    pub const MEM_READ_RESP: u32 = 0x402;
    /// Host → simulator: `[address, 4, value]`.
    pub const MEM_WRITE_REQ: u32 = 0x403;
}

/// Decoded command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Heartbeat,
    Hello,
    Goodbye,
    Tick,
    MemReadReq,
    MemReadResp,
    MemWriteReq,
    /// Any id this bridge does not know about.
    Unknown(u32),
}

impl Command {
    /// Map a raw id to a command.
    pub fn from_id(id: u32) -> Self {
        match id {
            commands::HEARTBEAT => Command::Heartbeat,
            commands::HELLO => Command::Hello,
            commands::GOODBYE => Command::Goodbye,
            commands::TICK => Command::Tick,
            commands::MEM_READ_REQ => Command::MemReadReq,
            commands::MEM_READ_RESP => Command::MemReadResp,
            commands::MEM_WRITE_REQ => Command::MemWriteReq,
            other => Command::Unknown(other),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Command id.
    pub id: u32,
    /// Payload length in bytes (multiple of 4).
    pub byte_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(id: u32, byte_length: u32) -> Self {
        Self { id, byte_length }
    }

    /// Header for a frame carrying `words` data words.
    pub fn for_words(id: u32, words: usize) -> Self {
        Self::new(id, (words * WORD_SIZE) as u32)
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use adsp_simbridge::protocol::{Header, commands};
    ///
    /// let header = Header::new(commands::MEM_READ_REQ, 12);
    /// assert_eq!(header.encode(), [0x01, 0x04, 0, 0, 12, 0, 0, 0]);
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
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.byte_length.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            byte_length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header.
    ///
    /// Checks:
    /// - Length is a whole number of words
    /// - Length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.byte_length % WORD_SIZE as u32 != 0 {
            return Err(BridgeError::Protocol(format!(
                "Frame 0x{:x} length {} is not a multiple of 4",
                self.id, self.byte_length
            )));
        }

        if self.byte_length > max_payload_size {
            return Err(BridgeError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.byte_length, max_payload_size
            )));
        }

        Ok(())
    }

    /// Number of data words that follow this header.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.byte_length as usize / WORD_SIZE
    }

    /// Decoded command.
    #[inline]
    pub fn command(&self) -> Command {
        Command::from_id(self.id)
    }
}
