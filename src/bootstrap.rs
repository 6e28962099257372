//! Session bootstrap.
//!
//! [`Bridge::run`] wires everything together:
//! 1. Bind the control port (random, bounded retry)
//! 2. Write the simulator config file and launch the simulator
//! 3. Start the stdout/stderr monitors
//! 4. Accept the simulator connection
//! 5. Start the writer task and the protocol engine
//! 6. Wait for HELLO, release the DSP, then poll the trace window forever
//!
//! The session ends on GOODBYE, on the first fatal error, or when the
//! caller's cancellation token fires.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeConfig, TraceConfig};
use crate::error::{BridgeError, Result};
use crate::memory::map::STARTUP_WRITES;
use crate::memory::{RemoteMemory, SimMemory};
use crate::session::{ProtocolEngine, SessionEnd, SessionState};
use crate::sim::{launch_simulator, OutputMonitor, SimConfigFile};
use crate::tracker::Tracker;
use crate::transport::acquire_listener;
use crate::winstream::WinstreamReader;
use crate::writer::spawn_writer_task_default;

/// Release the DSP: audio reset, IPC enable, power-on, in that order.
pub async fn run_startup_sequence<M>(mem: &M) -> Result<()>
where
    M: RemoteMemory + ?Sized,
{
    for write in &STARTUP_WRITES {
        tracing::debug!(
            "Writing {} (0x{:08x}) = 0x{:x}",
            write.name,
            write.address,
            write.value
        );
        mem.write_word(write.address, write.value).await?;
    }
    Ok(())
}

/// Poll the trace winstream until cancelled, writing new text to `out`.
///
/// Bytes are decoded as UTF-8 with invalid sequences replaced.
pub async fn poll_trace<M, O>(
    mem: &M,
    config: &TraceConfig,
    out: &mut O,
    cancel: &CancellationToken,
) -> Result<()>
where
    M: RemoteMemory + ?Sized,
    O: AsyncWrite + Unpin,
{
    let mut reader = WinstreamReader::with_mode(config.window_address, config.read_mode);
    tracing::debug!(
        "Polling winstream at 0x{:08x} ({:?}) every {:?}",
        reader.address(),
        reader.mode(),
        config.poll_interval
    );

    loop {
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            bytes = reader.poll(mem) => bytes?,
        };

        if !bytes.is_empty() && config.emit {
            out.write_all(String::from_utf8_lossy(&bytes).as_bytes())
                .await?;
            out.flush().await?;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

/// Drive one accepted connection to completion.
///
/// Spawns the writer task and the protocol engine on the two halves,
/// waits for HELLO, performs the startup writes and polls the trace
/// window into `out`.
pub async fn serve_connection<R, W, O>(
    reader: R,
    writer: W,
    state: Arc<SessionState>,
    trace: &TraceConfig,
    out: &mut O,
    cancel: CancellationToken,
) -> Result<SessionEnd>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
{
    let (writer, writer_task) = spawn_writer_task_default(writer);
    let tracker = Tracker::new();

    let engine = ProtocolEngine::new(state.clone(), tracker.clone(), writer.clone());
    let engine_task = tokio::spawn(engine.run(reader, cancel.clone()));
    let mem = SimMemory::new(writer, tracker);

    let driver = async {
        tracing::debug!("Waiting for HELLO");
        state.wait_ready().await;
        tracing::debug!("Writing reset/startup registers");
        run_startup_sequence(&mem).await?;
        poll_trace(&mem, trace, out, &cancel).await
    };

    let driven = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        driven = driver => driven,
    };
    cancel.cancel();

    let ended = join(engine_task).await;
    drop(mem);
    if let Err(e) = join(writer_task).await {
        tracing::debug!("Writer finished with: {}", e);
    }

    match (ended, driven) {
        (Err(e), _) => Err(e),
        // Reads in flight when the engine stops fail with ConnectionClosed.
        (Ok(_), Err(e)) if !matches!(e, BridgeError::ConnectionClosed) => Err(e),
        (Ok(end), _) => Ok(end),
    }
}

async fn join<T>(task: JoinHandle<Result<T>>) -> Result<T> {
    task.await
        .map_err(|e| BridgeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// The whole bridge: listener, simulator, monitors and session.
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    /// Validate `config` and build a bridge.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run until GOODBYE, a fatal error or `cancel`.
    pub async fn run(self, cancel: CancellationToken) -> Result<SessionEnd> {
        let config = self.config;

        let listener = acquire_listener(&config.listen).await?;
        let mut stdout = tokio::io::stdout();
        let announce = format!("ACE simulator comm port = {}\n", listener.port());
        stdout.write_all(announce.as_bytes()).await?;
        stdout.flush().await?;

        // Must outlive the simulator, which reads it after start-up.
        let config_file = SimConfigFile::write(&config.simulator)?;
        let mut child = launch_simulator(&config.simulator, config_file.path(), listener.port())?;

        let state = Arc::new(SessionState::new(config.simulator.gdb_path.clone()));
        let monitor = OutputMonitor::new(
            state.clone(),
            config.simulator.verbosity.is_quiet(),
            config.simulator.start_halted,
        );
        if let Some(out) = child.stdout.take() {
            tokio::spawn(monitor.clone().run(out, tokio::io::stdout(), cancel.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(monitor.run(err, tokio::io::stdout(), cancel.clone()));
        }

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            status = child.wait() => {
                let status = status?;
                return Err(BridgeError::Launch(format!(
                    "Simulator exited before connecting ({})",
                    status
                )));
            }
            stream = listener.accept() => stream?,
        };
        drop(listener);

        let (reader, writer) = stream.into_split();
        let result =
            serve_connection(reader, writer, state, &config.trace, &mut stdout, cancel).await;

        drop(child);
        drop(config_file);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::map::{HDA_GCTL, HFDSSCS, HFIPC0CTL};
    use crate::memory::LocalMemory;
    use std::time::Duration;

    #[tokio::test]
    async fn test_startup_sequence_order() {
        let mem = LocalMemory::new();
        run_startup_sequence(&mem).await.unwrap();

        assert_eq!(mem.load_word(HDA_GCTL), 1);
        assert_eq!(mem.load_word(HFIPC0CTL), 3);
        assert_eq!(mem.load_word(HFDSSCS), 1 << 16);
    }

    fn trace_config() -> TraceConfig {
        TraceConfig {
            window_address: 0x1000,
            poll_interval: Duration::from_millis(5),
            ..TraceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_poll_trace_emits_and_stops() {
        let mem = LocalMemory::new();
        mem.store_words(0x1000, &[64, 0, 6, 6]);
        mem.store_bytes(0x1010, b"hello\n");

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stopper.cancel();
        });

        let mut out = Vec::new();
        poll_trace(&mem, &trace_config(), &mut out, &cancel)
            .await
            .unwrap();

        assert_eq!(out, b"hello\n");
        assert!(mem.word_reads() >= 3);
    }

    #[tokio::test]
    async fn test_poll_trace_without_emit() {
        let mem = LocalMemory::new();
        mem.store_words(0x1000, &[64, 0, 6, 6]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = TraceConfig {
            emit: false,
            ..trace_config()
        };
        let mut out = Vec::new();
        poll_trace(&mem, &config, &mut out, &cancel).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_bridge_rejects_invalid_config() {
        let mut config = BridgeConfig::new("sim");
        config.listen.attempts = 0;
        assert!(matches!(Bridge::new(config), Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_simulator_fails_launch() {
        let config = BridgeConfig::new("/nonexistent/dsp_mtl_sim");
        let bridge = Bridge::new(config).unwrap();

        let result = bridge.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::Launch(_))));
    }
}
