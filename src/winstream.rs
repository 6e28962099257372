//! Winstream trace reader.
//!
//! The firmware logs into a circular byte buffer ("winstream") in a shared
//! memory window. The layout, all little-endian words:
//!
//! ```text
//! ┌──────────┬───────┬─────┬──────────┬────────────────────────┐
//! │ capacity │ start │ end │ sequence │ capacity bytes of data │
//! └──────────┴───────┴─────┴──────────┴────────────────────────┘
//! ```
//!
//! `sequence` counts every byte ever written. The producer (the simulated
//! core) and this reader share no lock. Each remote read here is a full
//! request/response round trip over the control socket, which is slow
//! enough that a chatty producer can invalidate a snapshot while it is
//! being copied.
//!
//! [`ReadMode::Relaxed`] takes one pass and accepts the occasional torn
//! fragment: re-checking and retrying lets a busy producer freeze output
//! completely. [`ReadMode::Strict`] re-checks the header after copying and
//! retries a bounded number of times before giving up on the increment.
//!
//! # Example
//!
//! ```
//! use adsp_simbridge::memory::LocalMemory;
//! use adsp_simbridge::winstream::{read_increment, WINSTREAM_HEADER_SIZE};
//!
//! # tokio_test::block_on(async {
//! let mem = LocalMemory::new();
//! // capacity 64, start 0, end 5, 5 bytes written so far
//! mem.store_words(0x1000, &[64, 0, 5, 5]);
//! mem.store_bytes(0x1000 + WINSTREAM_HEADER_SIZE, b"boot\n");
//!
//! let (seq, bytes) = read_increment(&mem, 0x1000, 0).await.unwrap();
//! assert_eq!(seq, 5);
//! assert_eq!(bytes.as_ref(), b"boot\n");
//! # });
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::{BridgeError, Result};
use crate::memory::{RemoteMemory, MAX_READ_WORDS};

/// Size of the winstream header in bytes.
pub const WINSTREAM_HEADER_SIZE: u32 = 16;

/// Default retry budget for [`ReadMode::Strict`].
pub const DEFAULT_STRICT_RETRIES: u32 = 4;

/// Largest data region a header may claim. Any copy from it must fit in
/// one read, unaligned start included.
pub const MAX_WINSTREAM_CAPACITY: u32 = (MAX_READ_WORDS - 1) * 4;

/// Snapshot of the winstream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinstreamHeader {
    /// Size of the data region in bytes.
    pub capacity: u32,
    /// Offset of the oldest valid byte.
    pub start: u32,
    /// Offset one past the newest byte.
    pub end: u32,
    /// Total bytes ever written.
    pub sequence: u32,
}

impl WinstreamHeader {
    /// Decode from the four header words.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        match *words {
            [capacity, start, end, sequence, ..] => Some(Self {
                capacity,
                start,
                end,
                sequence,
            }),
            _ => None,
        }
    }

    /// Whether the offsets fit the capacity and the capacity is readable.
    ///
    /// A window the firmware has not set up yet can hold anything.
    pub fn is_plausible(&self) -> bool {
        self.capacity <= MAX_WINSTREAM_CAPACITY
            && self.start < self.capacity
            && self.end < self.capacity
    }

    /// Number of valid bytes, `(end - start) mod capacity`.
    pub fn used(&self) -> u32 {
        modulo(i64::from(self.end) - i64::from(self.start), self.capacity)
    }
}

/// Euclidean remainder; a zero modulus yields 0.
fn modulo(value: i64, modulus: u32) -> u32 {
    if modulus == 0 {
        return 0;
    }
    value.rem_euclid(i64::from(modulus)) as u32
}

/// What a header snapshot tells the reader to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    /// Nothing new since `last_sequence`.
    UpToDate,
    /// The buffer is empty.
    Empty,
    /// The header is not a usable winstream; read nothing and keep the
    /// cursor.
    Invalid,
    /// The producer lapped the reader; the unread bytes are gone.
    Overrun {
        /// Bytes the reader was behind.
        behind: u32,
    },
    /// Copy `behind` bytes starting at data offset `copy`; the first
    /// `suffix` of them are contiguous, the rest wrap to offset 0.
    Copy {
        /// Bytes to copy in total.
        behind: u32,
        /// Data offset of the oldest unread byte.
        copy: u32,
        /// Bytes before the wrap point.
        suffix: u32,
    },
}

impl ReadPlan {
    /// Plan the copy for a reader positioned at `last_sequence`.
    pub fn for_header(header: &WinstreamHeader, last_sequence: u32) -> Self {
        if header.sequence == last_sequence {
            return ReadPlan::UpToDate;
        }
        if header.start == header.end || header.capacity == 0 {
            return ReadPlan::Empty;
        }
        if !header.is_plausible() {
            return ReadPlan::Invalid;
        }

        let behind = header.sequence.wrapping_sub(last_sequence);
        if behind > header.used() {
            return ReadPlan::Overrun { behind };
        }

        let copy = modulo(i64::from(header.end) - i64::from(behind), header.capacity);
        let suffix = behind.min(header.capacity - copy);
        ReadPlan::Copy {
            behind,
            copy,
            suffix,
        }
    }
}

/// How hard to try for an untorn snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Single pass. Torn fragments are possible under heavy logging.
    #[default]
    Relaxed,
    /// Re-read the header after copying and retry while the producer has
    /// overwritten the copied region, at most `max_retries` extra passes.
    Strict {
        /// Extra passes before the increment is dropped.
        max_retries: u32,
    },
}

impl ReadMode {
    /// Strict mode with [`DEFAULT_STRICT_RETRIES`].
    pub fn strict() -> Self {
        ReadMode::Strict {
            max_retries: DEFAULT_STRICT_RETRIES,
        }
    }
}

/// Read the header at `address`.
pub async fn read_header<M>(mem: &M, address: u32) -> Result<WinstreamHeader>
where
    M: RemoteMemory + ?Sized,
{
    let words = mem.read_words(address, 4).await?;
    WinstreamHeader::from_words(&words)
        .ok_or_else(|| BridgeError::Protocol("Short winstream header read".to_string()))
}

/// Copy the bytes a plan describes.
async fn copy_plan<M>(mem: &M, address: u32, plan: ReadPlan) -> Result<Bytes>
where
    M: RemoteMemory + ?Sized,
{
    let ReadPlan::Copy {
        behind,
        copy,
        suffix,
    } = plan
    else {
        return Ok(Bytes::new());
    };

    let data = address.wrapping_add(WINSTREAM_HEADER_SIZE);
    let head = mem.read_bytes(data.wrapping_add(copy), suffix).await?;
    if suffix >= behind {
        return Ok(head);
    }

    let tail = mem.read_bytes(data, behind - suffix).await?;
    let mut out = BytesMut::with_capacity(behind as usize);
    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
    Ok(out.freeze())
}

/// One relaxed pass: return the new sequence and whatever was appended
/// since `last_sequence`.
///
/// Empty bytes mean either nothing new or an overrun; in both cases the
/// returned sequence is where the next read should start.
pub async fn read_increment<M>(mem: &M, address: u32, last_sequence: u32) -> Result<(u32, Bytes)>
where
    M: RemoteMemory + ?Sized,
{
    let header = read_header(mem, address).await?;
    let plan = ReadPlan::for_header(&header, last_sequence);
    match plan {
        ReadPlan::Invalid => {
            tracing::debug!("Ignoring implausible winstream header {:?}", header);
            return Ok((last_sequence, Bytes::new()));
        }
        ReadPlan::Overrun { behind } => tracing::debug!(
            "Winstream overrun: {} bytes behind, {} valid, dropping",
            behind,
            header.used()
        ),
        _ => {}
    }
    let bytes = copy_plan(mem, address, plan).await?;
    Ok((header.sequence, bytes))
}

/// Strict variant of [`read_increment`].
///
/// After copying, the header is read again. If the producer has since
/// overwritten the oldest copied byte the copy is discarded and the read
/// repeated, up to `max_retries` times; after that the increment is
/// dropped like an overrun.
pub async fn read_increment_strict<M>(
    mem: &M,
    address: u32,
    last_sequence: u32,
    max_retries: u32,
) -> Result<(u32, Bytes)>
where
    M: RemoteMemory + ?Sized,
{
    let mut header = read_header(mem, address).await?;

    for attempt in 0..=max_retries {
        let plan = ReadPlan::for_header(&header, last_sequence);
        match plan {
            ReadPlan::Copy { .. } => {}
            ReadPlan::Invalid => {
                tracing::debug!("Ignoring implausible winstream header {:?}", header);
                return Ok((last_sequence, Bytes::new()));
            }
            ReadPlan::Overrun { behind } => {
                tracing::debug!("Winstream overrun: {} bytes behind, dropping", behind);
                return Ok((header.sequence, Bytes::new()));
            }
            ReadPlan::UpToDate | ReadPlan::Empty => {
                return Ok((header.sequence, Bytes::new()));
            }
        }

        let bytes = copy_plan(mem, address, plan).await?;
        let after = read_header(mem, address).await?;

        if after.sequence.wrapping_sub(last_sequence) <= after.used() {
            return Ok((header.sequence, bytes));
        }

        tracing::debug!(
            "Winstream copy torn (attempt {}/{}), producer at {}",
            attempt + 1,
            max_retries + 1,
            after.sequence
        );
        header = after;
    }

    tracing::debug!("Winstream strict read gave up, skipping to {}", header.sequence);
    Ok((header.sequence, Bytes::new()))
}

/// A winstream reader with its own cursor.
#[derive(Debug, Clone)]
pub struct WinstreamReader {
    address: u32,
    cursor: u32,
    mode: ReadMode,
}

impl WinstreamReader {
    /// Reader for the winstream at `address`, starting at sequence 0.
    pub fn new(address: u32) -> Self {
        Self::with_mode(address, ReadMode::default())
    }

    /// Reader with an explicit read mode.
    pub fn with_mode(address: u32, mode: ReadMode) -> Self {
        Self {
            address,
            cursor: 0,
            mode,
        }
    }

    /// Last sequence this reader has consumed up to.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Header address.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Read mode.
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Fetch whatever was logged since the last poll.
    ///
    /// The cursor only moves when the read succeeds.
    pub async fn poll<M>(&mut self, mem: &M) -> Result<Bytes>
    where
        M: RemoteMemory + ?Sized,
    {
        let (sequence, bytes) = match self.mode {
            ReadMode::Relaxed => read_increment(mem, self.address, self.cursor).await?,
            ReadMode::Strict { max_retries } => {
                read_increment_strict(mem, self.address, self.cursor, max_retries).await?
            }
        };
        self.cursor = sequence;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LocalMemory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: u32 = 0x3002_a000;
    const DATA: u32 = BASE + WINSTREAM_HEADER_SIZE;

    fn header(capacity: u32, start: u32, end: u32, sequence: u32) -> WinstreamHeader {
        WinstreamHeader {
            capacity,
            start,
            end,
            sequence,
        }
    }

    fn stream(capacity: u32, start: u32, end: u32, sequence: u32) -> LocalMemory {
        let mem = LocalMemory::new();
        mem.store_words(BASE, &[capacity, start, end, sequence]);
        mem
    }

    #[test]
    fn test_used_wraps() {
        assert_eq!(header(64, 10, 20, 0).used(), 10);
        assert_eq!(header(64, 60, 4, 0).used(), 8);
        assert_eq!(header(0, 1, 2, 0).used(), 0);
    }

    #[test]
    fn test_plan_up_to_date() {
        assert_eq!(ReadPlan::for_header(&header(64, 10, 20, 500), 500), ReadPlan::UpToDate);
    }

    #[test]
    fn test_plan_empty() {
        assert_eq!(ReadPlan::for_header(&header(64, 7, 7, 500), 10), ReadPlan::Empty);
    }

    #[test]
    fn test_plan_overrun() {
        assert_eq!(
            ReadPlan::for_header(&header(64, 10, 20, 500), 489),
            ReadPlan::Overrun { behind: 11 }
        );
    }

    #[test]
    fn test_plan_rejects_garbage_header() {
        let garbage = header(0xFFFF_FFF0, 0, 0xFFFF_FF00, 0xFFFF_FF00);
        assert!(!garbage.is_plausible());
        assert_eq!(ReadPlan::for_header(&garbage, 0), ReadPlan::Invalid);
        assert_eq!(ReadPlan::for_header(&header(64, 3, 70, 9), 0), ReadPlan::Invalid);
    }

    #[test]
    fn test_plan_sequence_wraparound() {
        // Counter wrapped past u32::MAX: 6 bytes behind.
        let plan = ReadPlan::for_header(&header(64, 10, 20, 2), u32::MAX - 3);
        assert_eq!(
            plan,
            ReadPlan::Copy {
                behind: 6,
                copy: 14,
                suffix: 6
            }
        );
    }

    #[tokio::test]
    async fn test_no_new_data() {
        let mem = stream(64, 10, 20, 1000);
        let (seq, bytes) = read_increment(&mem, BASE, 1000).await.unwrap();
        assert_eq!(seq, 1000);
        assert!(bytes.is_empty());
        assert_eq!(mem.word_reads(), 1);
    }

    #[tokio::test]
    async fn test_overrun_returns_empty() {
        let mem = stream(64, 10, 20, 1000);
        let (seq, bytes) = read_increment(&mem, BASE, 900).await.unwrap();
        assert_eq!(seq, 1000);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_contiguous_copy() {
        let mem = stream(64, 10, 20, 1000);
        mem.store_bytes(DATA + 10, b"0123456789");

        let (seq, bytes) = read_increment(&mem, BASE, 996).await.unwrap();
        assert_eq!(seq, 1000);
        assert_eq!(bytes.as_ref(), b"6789");
    }

    #[tokio::test]
    async fn test_wraparound_copy() {
        // Valid region is [56, 64) ++ [0, 6); reader is 10 bytes behind.
        let mem = stream(64, 56, 6, 314);
        mem.store_bytes(DATA + 54, b"xxAAAABBBB");
        mem.store_bytes(DATA, b"CCDDEE");

        let plan = ReadPlan::for_header(&header(64, 56, 6, 314), 304);
        assert_eq!(
            plan,
            ReadPlan::Copy {
                behind: 10,
                copy: 60,
                suffix: 4
            }
        );

        let (seq, bytes) = read_increment(&mem, BASE, 304).await.unwrap();
        assert_eq!(seq, 314);
        assert_eq!(bytes.as_ref(), b"BBBBCCDDEE");
    }

    #[tokio::test]
    async fn test_reader_advances_cursor() {
        let mem = stream(64, 0, 3, 3);
        mem.store_bytes(DATA, b"abc");

        let mut reader = WinstreamReader::new(BASE);
        assert_eq!(reader.poll(&mem).await.unwrap().as_ref(), b"abc");
        assert_eq!(reader.cursor(), 3);

        assert!(reader.poll(&mem).await.unwrap().is_empty());

        mem.store_words(BASE, &[64, 0, 5, 5]);
        mem.store_bytes(DATA + 3, b"de");
        assert_eq!(reader.poll(&mem).await.unwrap().as_ref(), b"de");
        assert_eq!(reader.cursor(), 5);
    }

    #[tokio::test]
    async fn test_garbage_header_reads_nothing() {
        let mem = stream(0xFFFF_FFF0, 0, 0xFFFF_FF00, 0xFFFF_FF00);

        let (seq, bytes) = read_increment(&mem, BASE, 0).await.unwrap();
        assert_eq!(seq, 0);
        assert!(bytes.is_empty());
        assert_eq!(mem.word_reads(), 1);

        let (seq, bytes) = read_increment_strict(&mem, BASE, 0, 2).await.unwrap();
        assert_eq!(seq, 0);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_reader_waits_for_window_setup() {
        let mem = stream(0xFFFF_FFF0, 0, 0xFFFF_FF00, 0xFFFF_FF00);
        let mut reader = WinstreamReader::new(BASE);
        assert!(reader.poll(&mem).await.unwrap().is_empty());
        assert_eq!(reader.cursor(), 0);

        mem.store_words(BASE, &[64, 0, 4, 4]);
        mem.store_bytes(DATA, b"up!\n");
        assert_eq!(reader.poll(&mem).await.unwrap().as_ref(), b"up!\n");
        assert_eq!(reader.cursor(), 4);
    }

    #[tokio::test]
    async fn test_reader_skips_ahead_after_overrun() {
        let mem = stream(16, 4, 12, 100);
        let mut reader = WinstreamReader::new(BASE);

        assert!(reader.poll(&mem).await.unwrap().is_empty());
        assert_eq!(reader.cursor(), 100);
    }

    /// Memory whose producer appends a burst after a given number of reads.
    struct BusyProducer {
        inner: LocalMemory,
        reads: AtomicUsize,
        burst_after: usize,
        burst: [u32; 4],
    }

    #[async_trait]
    impl RemoteMemory for BusyProducer {
        async fn read_words(&self, address: u32, count: u32) -> Result<Vec<u32>> {
            let n = self.reads.fetch_add(1, Ordering::AcqRel);
            if n == self.burst_after {
                self.inner.store_words(BASE, &self.burst);
            }
            self.inner.read_words(address, count).await
        }

        async fn write_word(&self, address: u32, value: u32) -> Result<()> {
            self.inner.write_word(address, value).await
        }
    }

    #[tokio::test]
    async fn test_strict_retries_torn_copy() {
        // Reader at 0 sees 8 bytes; while copying, the producer laps the
        // whole buffer so the re-check fails; the retry sees an overrun.
        let inner = stream(16, 0, 8, 8);
        inner.store_bytes(DATA, b"original");
        let mem = BusyProducer {
            inner,
            reads: AtomicUsize::new(0),
            burst_after: 1,
            burst: [16, 4, 3, 40],
        };

        let (seq, bytes) = read_increment_strict(&mem, BASE, 0, 2).await.unwrap();
        assert_eq!(seq, 40);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_relaxed_keeps_torn_copy() {
        let inner = stream(16, 0, 8, 8);
        inner.store_bytes(DATA, b"original");
        let mem = BusyProducer {
            inner,
            reads: AtomicUsize::new(0),
            burst_after: 1,
            burst: [16, 4, 3, 40],
        };

        let (seq, bytes) = read_increment(&mem, BASE, 0).await.unwrap();
        assert_eq!(seq, 8);
        assert_eq!(bytes.as_ref(), b"original");
    }

    #[tokio::test]
    async fn test_strict_accepts_stable_copy() {
        let mem = stream(64, 0, 4, 4);
        mem.store_bytes(DATA, b"ok!\n");

        let mut reader = WinstreamReader::with_mode(BASE, ReadMode::strict());
        assert_eq!(reader.poll(&mem).await.unwrap().as_ref(), b"ok!\n");
        assert_eq!(reader.cursor(), 4);
    }

    #[tokio::test]
    async fn test_strict_tolerates_small_append() {
        // Producer appends 2 bytes mid-copy without reaching the copied region.
        let inner = stream(64, 0, 4, 4);
        inner.store_bytes(DATA, b"abcd");
        let mem = BusyProducer {
            inner,
            reads: AtomicUsize::new(0),
            burst_after: 1,
            burst: [64, 0, 6, 6],
        };

        let (seq, bytes) = read_increment_strict(&mem, BASE, 0, 2).await.unwrap();
        assert_eq!(seq, 4);
        assert_eq!(bytes.as_ref(), b"abcd");
    }
}
