//! Remote memory over the simulator control socket.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use super::{read_byte_length, RemoteMemory};
use crate::error::{BridgeError, Result};
use crate::protocol::Frame;
use crate::tracker::Tracker;
use crate::writer::WriterHandle;

/// [`RemoteMemory`] backed by MEM_READ_REQ / MEM_WRITE_REQ frames.
///
/// Reads are correlated through the shared [`Tracker`], which the session
/// engine completes as MEM_READ_RESP frames arrive. There is no timeout:
/// a read the simulator never answers waits until the session ends.
#[derive(Debug)]
pub struct SimMemory {
    writer: WriterHandle,
    tracker: Tracker,
    last_sequence: AtomicU32,
}

impl SimMemory {
    /// Create a memory handle sending through `writer`.
    ///
    /// `tracker` must be the same tracker the session engine completes.
    pub fn new(writer: WriterHandle, tracker: Tracker) -> Self {
        Self {
            writer,
            tracker,
            last_sequence: AtomicU32::new(0),
        }
    }

    /// Allocate the next read sequence number. The first read uses 1.
    fn next_sequence(&self) -> u32 {
        self.last_sequence.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// The tracker reads are registered with.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }
}

#[async_trait]
impl RemoteMemory for SimMemory {
    async fn read_words(&self, address: u32, count: u32) -> Result<Vec<u32>> {
        let byte_length = read_byte_length(count)?;
        let sequence = self.next_sequence();
        let pending = self.tracker.register(sequence)?;

        tracing::trace!(
            "MEM_READ_REQ 0x{:08x} ({} bytes) seq {}",
            address,
            byte_length,
            sequence
        );
        self.writer
            .send_frame(&Frame::mem_read_request(address, byte_length, sequence))
            .await?;

        let mut words = pending.wait().await?;
        if words.len() < count as usize {
            return Err(BridgeError::Protocol(format!(
                "Read of {} words at 0x{:08x} returned {}",
                count,
                address,
                words.len()
            )));
        }
        words.truncate(count as usize);
        Ok(words)
    }

    async fn write_word(&self, address: u32, value: u32) -> Result<()> {
        tracing::trace!("MEM_WRITE_REQ 0x{:08x} = 0x{:08x}", address, value);
        self.writer
            .send_frame(&Frame::mem_write_request(address, value))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{commands, FrameBuffer};
    use crate::writer::spawn_writer_task_default;
    use tokio::io::{duplex, AsyncReadExt};

    async fn next_frame<R: tokio::io::AsyncRead + Unpin>(
        reader: &mut R,
        buffer: &mut FrameBuffer,
    ) -> Frame {
        let mut buf = [0u8; 256];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed");
            let mut frames = buffer.push(&buf[..n]).unwrap();
            if !frames.is_empty() {
                return frames.remove(0);
            }
        }
    }

    #[tokio::test]
    async fn test_write_word_sends_request() {
        let (client, mut server) = duplex(1024);
        let (writer, _task) = spawn_writer_task_default(client);
        let mem = SimMemory::new(writer, Tracker::new());

        mem.write_word(0x2007_3228, 3).await.unwrap();

        let mut buffer = FrameBuffer::new();
        let frame = next_frame(&mut server, &mut buffer).await;
        assert_eq!(frame.id(), commands::MEM_WRITE_REQ);
        assert_eq!(frame.words(), &[0x2007_3228, 4, 3]);
    }

    #[tokio::test]
    async fn test_read_words_round_trip() {
        let (client, mut server) = duplex(1024);
        let (writer, _task) = spawn_writer_task_default(client);
        let tracker = Tracker::new();
        let mem = SimMemory::new(writer, tracker.clone());

        let responder = tokio::spawn(async move {
            let mut buffer = FrameBuffer::new();
            let request = next_frame(&mut server, &mut buffer).await;
            assert_eq!(request.id(), commands::MEM_READ_REQ);
            assert_eq!(request.words(), &[0x3002_a000, 8, 1]);
            assert!(tracker.complete(1, vec![10, 20]));
        });

        let words = mem.read_words(0x3002_a000, 2).await.unwrap();
        assert_eq!(words, vec![10, 20]);
        responder.await.unwrap();
        assert!(mem.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_short_response_is_protocol_error() {
        let (client, mut server) = duplex(1024);
        let (writer, _task) = spawn_writer_task_default(client);
        let tracker = Tracker::new();
        let mem = SimMemory::new(writer, tracker.clone());

        tokio::spawn(async move {
            let mut buffer = FrameBuffer::new();
            let _ = next_frame(&mut server, &mut buffer).await;
            tracker.complete(1, vec![1]);
        });

        let result = mem.read_words(0, 4).await;
        assert!(matches!(result, Err(BridgeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_read_sends_nothing() {
        let (client, mut server) = duplex(1024);
        let (writer, task) = spawn_writer_task_default(client);
        let mem = SimMemory::new(writer, Tracker::new());

        let result = mem.read_words(0, 1 << 30).await;
        assert!(matches!(result, Err(BridgeError::Protocol(_))));
        assert!(mem.tracker().is_empty());

        drop(mem);
        task.await.unwrap().unwrap();
        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic() {
        let (client, _server) = duplex(8);
        let (writer, _task) = spawn_writer_task_default(client);
        let mem = SimMemory::new(writer, Tracker::new());

        assert_eq!(mem.next_sequence(), 1);
        assert_eq!(mem.next_sequence(), 2);
        assert_eq!(mem.next_sequence(), 3);
    }
}
