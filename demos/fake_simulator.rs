//! Fake simulator - a whole session without the real simulator binary.
//!
//! This example demonstrates:
//! - Driving [`serve_connection`] over an in-memory `duplex` pipe
//! - Answering MEM_READ_REQ frames out of a [`LocalMemory`]
//! - Firmware trace text flowing from the winstream to stdout
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example fake_simulator
//! ```

use std::sync::Arc;
use std::time::Duration;

use adsp_simbridge::bootstrap::serve_connection;
use adsp_simbridge::config::TraceConfig;
use adsp_simbridge::memory::{LocalMemory, RemoteMemory};
use adsp_simbridge::protocol::{build_frame, commands, FrameBuffer};
use adsp_simbridge::winstream::WINSTREAM_HEADER_SIZE;
use adsp_simbridge::SessionState;
use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Trace window address inside the fake memory.
const WINDOW: u32 = 0x1000;

/// Read responses to serve before saying GOODBYE.
const READS: usize = 6;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The simulator side: HELLO, then answer reads until GOODBYE.
async fn simulator(mut sim: DuplexStream, mem: LocalMemory) -> Result<(), BoxError> {
    let mut buffer = FrameBuffer::new();
    let mut buf = [0u8; 4096];
    let mut answered = 0;

    sim.write_all(&build_frame(commands::HELLO, &[])).await?;

    loop {
        let n = sim.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for frame in buffer.push(&buf[..n])? {
            match frame.id() {
                commands::MEM_WRITE_REQ => {
                    if let [address, _, value] = frame.words() {
                        mem.write_word(*address, *value).await?;
                        println!("[sim] write 0x{:08x} = 0x{:x}", address, value);
                    }
                }
                commands::MEM_READ_REQ if answered < READS => {
                    let [address, byte_length, seq] = frame.words() else {
                        continue;
                    };
                    let mut reply = vec![*seq];
                    reply.extend(mem.read_words(*address, byte_length / 4).await?);
                    sim.write_all(&build_frame(commands::MEM_READ_RESP, &reply))
                        .await?;

                    answered += 1;
                    if answered == 2 {
                        // The firmware logs a second line between polls.
                        mem.store_bytes(WINDOW + WINSTREAM_HEADER_SIZE + 12, b"second line\n");
                        mem.store_words(WINDOW, &[256, 0, 24, 24]);
                    }
                    if answered == READS {
                        sim.write_all(&build_frame(commands::GOODBYE, &[])).await?;
                    }
                }
                _ => {}
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mem = LocalMemory::new();
    mem.store_words(WINDOW, &[256, 0, 12, 12]);
    mem.store_bytes(WINDOW + WINSTREAM_HEADER_SIZE, b"hello world\n");

    let (sim, bridge) = duplex(64 * 1024);
    let simulator = tokio::spawn(simulator(sim, mem));

    let (reader, writer) = split(bridge);
    let state = Arc::new(SessionState::default());
    let trace = TraceConfig {
        window_address: WINDOW,
        poll_interval: Duration::from_millis(20),
        ..TraceConfig::default()
    };

    let mut stdout = tokio::io::stdout();
    let end = serve_connection(
        reader,
        writer,
        state.clone(),
        &trace,
        &mut stdout,
        CancellationToken::new(),
    )
    .await?;

    simulator.await??;
    println!(
        "Session ended with {:?}: {} frames in, {} heartbeats out",
        end,
        state.frames_received(),
        state.heartbeats_sent()
    );

    Ok(())
}
