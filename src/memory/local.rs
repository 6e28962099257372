//! In-process word memory.
//!
//! A sparse `address → word` map implementing [`RemoteMemory`]. Words that
//! were never written read back as zero. Used to exercise the byte and
//! winstream layers without a simulator attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{read_byte_length, RemoteMemory};
use crate::error::Result;
use crate::protocol::WORD_SIZE;

/// Sparse in-memory implementation of [`RemoteMemory`].
#[derive(Debug, Default)]
pub struct LocalMemory {
    words: Mutex<HashMap<u32, u32>>,
    word_reads: AtomicUsize,
}

impl LocalMemory {
    /// Create an empty (all-zero) memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory holding `bytes` at `base`.
    pub fn with_bytes(base: u32, bytes: &[u8]) -> Self {
        let mem = Self::new();
        mem.store_bytes(base, bytes);
        mem
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, u32>> {
        self.words.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a single word (address is rounded down to a word boundary).
    pub fn store_word(&self, address: u32, value: u32) {
        self.lock().insert(align_down(address), value);
    }

    /// Store consecutive words starting at `address`.
    pub fn store_words(&self, address: u32, values: &[u32]) {
        let mut words = self.lock();
        for (i, value) in values.iter().enumerate() {
            let addr = align_down(address).wrapping_add((i * WORD_SIZE) as u32);
            words.insert(addr, *value);
        }
    }

    /// Store bytes at any alignment, preserving neighbouring bytes.
    pub fn store_bytes(&self, address: u32, bytes: &[u8]) {
        let mut words = self.lock();
        for (i, byte) in bytes.iter().enumerate() {
            let addr = address.wrapping_add(i as u32);
            let slot = words.entry(align_down(addr)).or_insert(0);
            let mut le = slot.to_le_bytes();
            le[(addr % WORD_SIZE as u32) as usize] = *byte;
            *slot = u32::from_le_bytes(le);
        }
    }

    /// Load a single word.
    pub fn load_word(&self, address: u32) -> u32 {
        self.lock().get(&align_down(address)).copied().unwrap_or(0)
    }

    /// Number of `read_words` calls served so far.
    pub fn word_reads(&self) -> usize {
        self.word_reads.load(Ordering::Acquire)
    }
}

fn align_down(address: u32) -> u32 {
    address & !(WORD_SIZE as u32 - 1)
}

#[async_trait]
impl RemoteMemory for LocalMemory {
    async fn read_words(&self, address: u32, count: u32) -> Result<Vec<u32>> {
        read_byte_length(count)?;
        self.word_reads.fetch_add(1, Ordering::AcqRel);
        let words = self.lock();
        Ok((0..count)
            .map(|i| {
                let addr = align_down(address).wrapping_add(i * WORD_SIZE as u32);
                words.get(&addr).copied().unwrap_or(0)
            })
            .collect())
    }

    async fn write_word(&self, address: u32, value: u32) -> Result<()> {
        self.store_word(address, value);
        Ok(())
    }
}
