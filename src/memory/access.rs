//! The remote memory abstraction.
//!
//! The wire protocol only moves whole little-endian words, so byte reads
//! are synthesized here from word reads.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BridgeError, Result};
use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, WORD_SIZE};

/// Largest word count one read may ask for. The response carries the
/// sequence word too and must fit in a single frame.
pub const MAX_READ_WORDS: u32 = DEFAULT_MAX_PAYLOAD_SIZE / WORD_SIZE as u32 - 1;

/// Byte length of a read of `count` words.
///
/// Reads above [`MAX_READ_WORDS`] are rejected before anything is sent.
pub fn read_byte_length(count: u32) -> Result<u32> {
    if count > MAX_READ_WORDS {
        return Err(BridgeError::Protocol(format!(
            "Read of {} words exceeds maximum {}",
            count, MAX_READ_WORDS
        )));
    }
    count
        .checked_mul(WORD_SIZE as u32)
        .ok_or_else(|| BridgeError::Protocol(format!("Read of {} words overflows", count)))
}

/// Word-granular access to simulator memory.
///
/// Implemented by [`SimMemory`](super::SimMemory) over the control socket,
/// and by [`LocalMemory`](super::LocalMemory) in-process.
#[async_trait]
pub trait RemoteMemory: Send + Sync {
    /// Read `count` consecutive words starting at `address`.
    ///
    /// Implementations return exactly `count` words, in address order.
    async fn read_words(&self, address: u32, count: u32) -> Result<Vec<u32>>;

    /// Write one word. No acknowledgment is awaited.
    async fn write_word(&self, address: u32, value: u32) -> Result<()>;

    /// Read `length` bytes starting at an arbitrary `address`.
    async fn read_bytes(&self, address: u32, length: u32) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let span = WordSpan::covering(address, length)?;
        let words = self.read_words(span.aligned_address, span.word_count).await?;
        Ok(span.extract(&words))
    }
}

/// The word-aligned window that covers an unaligned byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSpan {
    /// First word address (rounded down).
    pub aligned_address: u32,
    /// Bytes between `aligned_address` and the requested address.
    pub prepad: u32,
    /// Number of words to read.
    pub word_count: u32,
    /// Requested byte length.
    pub length: u32,
}

impl WordSpan {
    /// Compute the span for `length` bytes at `address`.
    ///
    /// Fails when the span does not fit in one read.
    pub fn covering(address: u32, length: u32) -> Result<Self> {
        let word = WORD_SIZE as u32;
        let prepad = address % word;
        let word_count = length
            .checked_add(prepad)
            .map(|bytes| bytes.div_ceil(word))
            .ok_or_else(|| {
                BridgeError::Protocol(format!(
                    "Byte read of {} at 0x{:08x} overflows",
                    length, address
                ))
            })?;
        read_byte_length(word_count)?;

        Ok(Self {
            aligned_address: address - prepad,
            prepad,
            word_count,
            length,
        })
    }

    /// Pack `words` little-endian and slice out the requested bytes.
    ///
    /// Missing trailing words (a short read) yield a short result rather
    /// than a panic.
    pub fn extract(&self, words: &[u32]) -> Bytes {
        let packed: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let start = (self.prepad as usize).min(packed.len());
        let end = (start + self.length as usize).min(packed.len());
        Bytes::copy_from_slice(&packed[start..end])
    }
}
