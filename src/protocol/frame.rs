//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame: header plus decoded data words.
//!
//! # Example
//!
//! ```
//! use adsp_simbridge::protocol::{commands, Frame};
//!
//! let frame = Frame::new(commands::MEM_WRITE_REQ, vec![0x2000_1000, 4, 1 << 16]);
//!
//! assert_eq!(frame.id(), 0x403);
//! assert_eq!(frame.header.byte_length, 12);
//! assert_eq!(frame.encode().len(), 8 + 12);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{commands, Command, Header, HEADER_SIZE, WORD_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Data words, `header.byte_length / 4` of them.
    pub words: Vec<u32>,
}

impl Frame {
    /// Create a frame from an id and its data words.
    pub fn new(id: u32, words: Vec<u32>) -> Self {
        Self {
            header: Header::for_words(id, words.len()),
            words,
        }
    }

    /// Create a frame from a decoded header and its words.
    pub fn from_parts(header: Header, words: Vec<u32>) -> Self {
        Self { header, words }
    }

    /// A HEARTBEAT frame (no payload).
    pub fn heartbeat() -> Self {
        Self::new(commands::HEARTBEAT, Vec::new())
    }

    /// A MEM_READ_REQ for `byte_length` bytes at `address`, tagged with `sequence`.
    pub fn mem_read_request(address: u32, byte_length: u32, sequence: u32) -> Self {
        Self::new(commands::MEM_READ_REQ, vec![address, byte_length, sequence])
    }

    /// A four-byte MEM_WRITE_REQ of `value` at `address`.
    pub fn mem_write_request(address: u32, value: u32) -> Self {
        Self::new(commands::MEM_WRITE_REQ, vec![address, WORD_SIZE as u32, value])
    }

    /// Get the command id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.header.id
    }

    /// Get the decoded command.
    #[inline]
    pub fn command(&self) -> Command {
        self.header.command()
    }

    /// Get the data words.
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Total encoded size (header + data).
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.words.len() * WORD_SIZE
    }

    /// Encode to a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.header.encode());
        for word in &self.words {
            buf.put_u32_le(*word);
        }
        buf.freeze()
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Example
///
/// ```
/// use adsp_simbridge::protocol::{build_frame, commands};
///
/// let bytes = build_frame(commands::MEM_READ_RESP, &[1, 0xAABB_CCDD]);
/// assert_eq!(bytes.len(), 8 + 8);
/// assert_eq!(&bytes[12..], &[0xDD, 0xCC, 0xBB, 0xAA]);
/// ```
pub fn build_frame(id: u32, words: &[u32]) -> Vec<u8> {
    let header = Header::for_words(id, words.len());
    let mut buf = Vec::with_capacity(HEADER_SIZE + words.len() * WORD_SIZE);
    buf.extend_from_slice(&header.encode());
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    buf
}
