//! Protocol session engine.
//!
//! Owns the read half of the simulator connection. Every inbound frame is
//! dispatched by command id and answered with a HEARTBEAT: the simulator
//! blocks its own clock until it hears back, so the heartbeat is what
//! keeps simulated time moving. GOODBYE ends the session without a reply.
//!
//! ```text
//! socket ──► FrameBuffer ──► handle_frame ──┬─► SessionState (HELLO)
//!                                           ├─► Tracker::complete (MEM_READ_RESP)
//!                                           └─► WriterHandle ◄── HEARTBEAT
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::protocol::{Command, Frame, FrameBuffer};
use crate::tracker::Tracker;
use crate::writer::WriterHandle;

/// Read buffer size for the socket.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default debugger executable before the simulator reports its own.
pub const DEFAULT_GDB_PATH: &str = "xt-gdb";

/// Shared state of one simulator session.
#[derive(Debug)]
pub struct SessionState {
    connected: AtomicBool,
    ready: watch::Sender<bool>,
    gdb_path: Mutex<String>,
    frames_received: AtomicU64,
    heartbeats_sent: AtomicU64,
}

impl SessionState {
    /// Fresh, disconnected, not-ready state.
    pub fn new(gdb_path: impl Into<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(false),
            ready,
            gdb_path: Mutex::new(gdb_path.into()),
            frames_received: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
        }
    }

    /// Flip `ready` to true.
    ///
    /// Returns `true` only for the call that made the transition.
    pub fn mark_ready(&self) -> bool {
        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Whether HELLO has been seen.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until HELLO has been seen.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Whether the engine is currently attached to a socket.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record connection state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Debugger executable to launch for core attach.
    pub fn gdb_path(&self) -> String {
        self.gdb_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the debugger executable path.
    pub fn set_gdb_path(&self, path: impl Into<String>) {
        *self.gdb_path.lock().unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    /// Frames received so far, GOODBYE included.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Acquire)
    }

    /// Heartbeats queued so far.
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Acquire)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_GDB_PATH)
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The simulator said GOODBYE.
    Goodbye,
    /// The cancellation token fired first.
    Cancelled,
}

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The frame dispatch loop for one connection.
#[derive(Debug)]
pub struct ProtocolEngine {
    state: Arc<SessionState>,
    tracker: Tracker,
    writer: WriterHandle,
}

impl ProtocolEngine {
    /// Create an engine.
    ///
    /// `tracker` must be shared with the [`SimMemory`](crate::memory::SimMemory)
    /// issuing reads, and `writer` must write to the same connection.
    pub fn new(
        state: Arc<SessionState>,
        tracker: Tracker,
        writer: WriterHandle,
    ) -> Self {
        Self {
            state,
            tracker,
            writer,
        }
    }

    /// Service the connection until GOODBYE, cancellation or failure.
    ///
    /// Whatever the outcome, `cancel` is tripped on return so sibling tasks
    /// unwind, and every outstanding read fails with `ConnectionClosed`.
    pub async fn run<R>(self, mut reader: R, cancel: CancellationToken) -> Result<SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        self.state.set_connected(true);
        let result = self.read_loop(&mut reader, &cancel).await;
        self.state.set_connected(false);

        match &result {
            Ok(SessionEnd::Goodbye) => tracing::info!("Simulator said GOODBYE"),
            Ok(SessionEnd::Cancelled) => tracing::debug!("Session cancelled"),
            Err(e) => tracing::error!("Session error: {}", e),
        }

        self.tracker.fail_all();
        cancel.cancel();
        result
    }

    async fn read_loop<R>(&self, reader: &mut R, cancel: &CancellationToken) -> Result<SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                read = reader.read(&mut buf) => read?,
            };

            if n == 0 {
                if frame_buffer.is_mid_frame() {
                    return Err(BridgeError::Protocol(format!(
                        "Connection closed mid-frame ({} bytes buffered)",
                        frame_buffer.len()
                    )));
                }
                return Err(BridgeError::ConnectionClosed);
            }

            for frame in frame_buffer.push(&buf[..n])? {
                if self.handle_frame(frame).await? == Flow::Stop {
                    return Ok(SessionEnd::Goodbye);
                }
            }
        }
    }

    /// Dispatch one frame and send the heartbeat that follows it.
    async fn handle_frame(&self, frame: Frame) -> Result<Flow> {
        self.state.frames_received.fetch_add(1, Ordering::AcqRel);

        match frame.command() {
            Command::Heartbeat | Command::Tick => {}
            Command::Hello => {
                if self.state.mark_ready() {
                    tracing::info!("Simulator said HELLO");
                } else {
                    tracing::debug!("Repeated HELLO ignored");
                }
            }
            Command::Goodbye => return Ok(Flow::Stop),
            Command::MemReadResp => match frame.words.split_first() {
                Some((&sequence, payload)) => {
                    self.tracker.complete(sequence, payload.to_vec());
                }
                None => tracing::warn!("MEM_READ_RESP without a sequence word"),
            },
            Command::MemReadReq | Command::MemWriteReq | Command::Unknown(_) => {
                tracing::warn!(
                    "Unrecognized command 0x{:x}, data {:08x?}",
                    frame.id(),
                    frame.words()
                );
            }
        }

        self.writer.send_frame(&Frame::heartbeat()).await?;
        self.state.heartbeats_sent.fetch_add(1, Ordering::AcqRel);
        Ok(Flow::Continue)
    }
}
