//! Integration tests for adsp-simbridge.
//!
//! These tests verify the integration between different modules.

use std::sync::Arc;
use std::time::Duration;

use adsp_simbridge::bootstrap::serve_connection;
use adsp_simbridge::config::TraceConfig;
use adsp_simbridge::memory::map::{HDA_GCTL, HFDSSCS, HFIPC0CTL};
use adsp_simbridge::memory::{LocalMemory, RemoteMemory};
use adsp_simbridge::protocol::{build_frame, commands, Frame, FrameBuffer, HEADER_SIZE};
use adsp_simbridge::winstream::{ReadMode, WinstreamReader, WINSTREAM_HEADER_SIZE};
use adsp_simbridge::{SessionEnd, SessionState};
use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

/// Test multiple frames in sequence.
#[test]
fn test_multiple_frames_sequence() {
    let mut buffer = FrameBuffer::new();
    let mut all_bytes = Vec::new();

    all_bytes.extend(build_frame(commands::HELLO, &[]));
    for seq in 1u32..=4 {
        all_bytes.extend(build_frame(commands::MEM_READ_RESP, &[seq, seq * 100]));
    }
    all_bytes.extend(build_frame(commands::GOODBYE, &[]));

    let frames = buffer.push(&all_bytes).unwrap();
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0].id(), commands::HELLO);
    for (i, frame) in frames[1..5].iter().enumerate() {
        let seq = i as u32 + 1;
        assert_eq!(frame.id(), commands::MEM_READ_RESP);
        assert_eq!(frame.words(), &[seq, seq * 100]);
    }
    assert_eq!(frames[5].id(), commands::GOODBYE);
    assert!(buffer.is_empty());
}

/// Test byte-at-a-time delivery.
#[test]
fn test_fragmented_frame_parsing() {
    let bytes = build_frame(commands::MEM_READ_RESP, &[9, 0xAABB_CCDD, 0x1122_3344]);
    assert_eq!(bytes.len(), HEADER_SIZE + 12);

    let mut buffer = FrameBuffer::new();
    for (i, byte) in bytes.iter().enumerate() {
        let frames = buffer.push(std::slice::from_ref(byte)).unwrap();
        if i + 1 < bytes.len() {
            assert!(frames.is_empty());
            assert!(buffer.is_mid_frame());
        } else {
            assert_eq!(frames, vec![Frame::new(
                commands::MEM_READ_RESP,
                vec![9, 0xAABB_CCDD, 0x1122_3344]
            )]);
        }
    }
}

/// Byte reads at every alignment return exactly the stored bytes.
#[tokio::test]
async fn test_read_bytes_alignment_grid() {
    let data: Vec<u8> = (0u8..32).map(|b| b.wrapping_mul(7).wrapping_add(3)).collect();
    let mem = LocalMemory::with_bytes(0x2000, &data);

    for offset in 0..4u32 {
        for len in [0u32, 1, 3, 4, 5, 8] {
            let got = mem.read_bytes(0x2000 + offset, len).await.unwrap();
            let start = offset as usize;
            assert_eq!(got.as_ref(), &data[start..start + len as usize]);
        }
    }
}

/// A winstream that wraps while the reader follows it.
#[tokio::test]
async fn test_winstream_follows_wrapping_producer() {
    const BASE: u32 = 0x3002_a000;
    let data = BASE + WINSTREAM_HEADER_SIZE;
    let mem = LocalMemory::new();
    let mut reader = WinstreamReader::with_mode(BASE, ReadMode::strict());

    mem.store_bytes(data, b"0123456789abcdef");
    mem.store_words(BASE, &[16, 0, 12, 12]);
    assert_eq!(reader.poll(&mem).await.unwrap().as_ref(), b"0123456789ab");

    // Producer appends "XYZW" plus "!!", wrapping at 16.
    mem.store_bytes(data + 12, b"XYZW");
    mem.store_bytes(data, b"!!");
    mem.store_words(BASE, &[16, 3, 2, 18]);
    assert_eq!(reader.poll(&mem).await.unwrap().as_ref(), b"XYZW!!");
    assert_eq!(reader.cursor(), 18);
}

struct SimulatorLog {
    writes: Vec<(u32, u32)>,
    heartbeats: usize,
}

/// Plays the simulator side: HELLO, answer reads out of `mem`, and say
/// GOODBYE after `reads` responses.
async fn fake_simulator(mut sim: DuplexStream, mem: LocalMemory, reads: usize) -> SimulatorLog {
    let mut log = SimulatorLog {
        writes: Vec::new(),
        heartbeats: 0,
    };
    let mut answered = 0;
    let mut buffer = FrameBuffer::new();
    let mut buf = [0u8; 1024];

    sim.write_all(&build_frame(commands::HELLO, &[])).await.unwrap();

    loop {
        let n = sim.read(&mut buf).await.unwrap();
        if n == 0 {
            return log;
        }

        for frame in buffer.push(&buf[..n]).unwrap() {
            match frame.id() {
                commands::HEARTBEAT => log.heartbeats += 1,
                commands::MEM_WRITE_REQ => {
                    assert_eq!(frame.words()[1], 4);
                    log.writes.push((frame.words()[0], frame.words()[2]));
                }
                commands::MEM_READ_REQ if answered < reads => {
                    let [address, byte_length, seq] = frame.words() else {
                        panic!("bad MEM_READ_REQ {:?}", frame.words());
                    };
                    let mut reply = vec![*seq];
                    reply.extend(mem.read_words(*address, byte_length / 4).await.unwrap());
                    sim.write_all(&build_frame(commands::MEM_READ_RESP, &reply))
                        .await
                        .unwrap();

                    answered += 1;
                    if answered == reads {
                        sim.write_all(&build_frame(commands::GOODBYE, &[]))
                            .await
                            .unwrap();
                    }
                }
                _ => {}
            }
        }
    }
}

/// Full session: HELLO, start-up writes, trace output, GOODBYE.
#[tokio::test]
async fn test_session_end_to_end() {
    let mem = LocalMemory::new();
    mem.store_words(0x1000, &[64, 0, 12, 12]);
    mem.store_bytes(0x1010, b"hello trace\n");

    let (sim, bridge) = duplex(64 * 1024);
    let simulator = tokio::spawn(fake_simulator(sim, mem, 3));

    let (reader, writer) = split(bridge);
    let state = Arc::new(SessionState::default());
    let trace = TraceConfig {
        window_address: 0x1000,
        poll_interval: Duration::from_millis(5),
        ..TraceConfig::default()
    };
    let mut out = Vec::new();

    let end = serve_connection(
        reader,
        writer,
        state.clone(),
        &trace,
        &mut out,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(end, SessionEnd::Goodbye);
    assert_eq!(out, b"hello trace\n");
    assert!(state.is_ready());

    let log = simulator.await.unwrap();
    assert_eq!(
        log.writes,
        vec![(HDA_GCTL, 1), (HFIPC0CTL, 3), (HFDSSCS, 1 << 16)]
    );
    // HELLO and three read responses; nothing after GOODBYE.
    assert_eq!(log.heartbeats, 4);
    assert_eq!(state.heartbeats_sent(), 4);
}

/// Cancelling before HELLO ends the session cleanly.
#[tokio::test]
async fn test_session_cancel_before_hello() {
    let (_sim, bridge) = duplex(1024);
    let (reader, writer) = split(bridge);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut out = Vec::new();
    let end = serve_connection(
        reader,
        writer,
        Arc::new(SessionState::default()),
        &TraceConfig::default(),
        &mut out,
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(end, SessionEnd::Cancelled);
    assert!(out.is_empty());
}
