//! Outstanding memory-read tracking.
//!
//! Each MEM_READ_REQ carries a sequence number that the simulator echoes
//! back as the first word of its MEM_READ_RESP. The [`Tracker`] maps those
//! numbers to a `oneshot` sender; the caller that issued the read holds
//! the matching [`PendingRead`] and awaits it.
//!
//! ```text
//! SimMemory::read_words ──register(seq)──► Tracker ◄──complete(seq, words)── session engine
//!          │                                                                   ▲
//!          └──── PendingRead::wait() ◄──────── oneshot ────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use adsp_simbridge::tracker::Tracker;
//!
//! # tokio_test::block_on(async {
//! let tracker = Tracker::new();
//! let pending = tracker.register(1).unwrap();
//!
//! assert!(tracker.complete(1, vec![0xAABB_CCDD]));
//! assert_eq!(pending.wait().await.unwrap(), vec![0xAABB_CCDD]);
//! assert!(tracker.is_empty());
//! # });
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{BridgeError, Result};

type Waiters = HashMap<u32, oneshot::Sender<Vec<u32>>>;

/// Map of outstanding read sequence numbers to their completion channels.
///
/// Cloning yields another handle to the same map.
#[derive(Clone, Debug, Default)]
pub struct Tracker {
    waiters: Arc<Mutex<Waiters>>,
}

impl Tracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new outstanding read.
    ///
    /// Fails if `sequence` is already outstanding.
    pub fn register(&self, sequence: u32) -> Result<PendingRead> {
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.lock();
        if waiters.contains_key(&sequence) {
            return Err(BridgeError::Protocol(format!(
                "Read sequence {} is already outstanding",
                sequence
            )));
        }
        waiters.insert(sequence, tx);

        Ok(PendingRead {
            sequence,
            rx,
            tracker: self.clone(),
        })
    }

    /// Deliver the payload of a read response.
    ///
    /// Returns `false` (and logs) when no read with that sequence is
    /// outstanding. That is the peer's mistake, so it never fails the
    /// caller and never touches other entries.
    pub fn complete(&self, sequence: u32, words: Vec<u32>) -> bool {
        let Some(tx) = self.lock().remove(&sequence) else {
            tracing::warn!("Read response for unknown sequence {}", sequence);
            return false;
        };

        if tx.send(words).is_err() {
            tracing::debug!("Reader for sequence {} went away before completion", sequence);
        }
        true
    }

    /// Drop every outstanding entry.
    ///
    /// Waiters observe `ConnectionClosed`. Used when the session ends.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!("Abandoning {} outstanding reads", drained.len());
        }
    }

    /// Whether `sequence` is outstanding.
    pub fn contains(&self, sequence: u32) -> bool {
        self.lock().contains_key(&sequence)
    }

    /// Number of outstanding reads.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// A registered read waiting for its response.
///
/// Dropping it without waiting removes the entry from the tracker, so an
/// abandoned read never leaves a stale sequence behind.
#[derive(Debug)]
pub struct PendingRead {
    sequence: u32,
    rx: oneshot::Receiver<Vec<u32>>,
    tracker: Tracker,
}

impl PendingRead {
    /// Sequence number this read was registered under.
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Wait for the response and return its payload words.
    ///
    /// The entry is gone from the tracker once this returns.
    pub async fn wait(mut self) -> Result<Vec<u32>> {
        (&mut self.rx)
            .await
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        self.rx.close();
        let mut waiters = self.tracker.lock();
        if waiters
            .get(&self.sequence)
            .is_some_and(oneshot::Sender::is_closed)
        {
            waiters.remove(&self.sequence);
        }
    }
}
