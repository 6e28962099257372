//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the simulator's binary command protocol:
//! - 8-byte header encoding/decoding (`id`, `byte_length`)
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed constructors for the requests the bridge sends

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    commands, Command, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, WORD_SIZE,
};
