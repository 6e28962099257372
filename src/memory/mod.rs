//! Memory module - remote memory access.
//!
//! Provides:
//! - [`RemoteMemory`] - word reads/writes plus byte reads built on them
//! - [`SimMemory`] - the implementation that talks to the simulator
//! - [`LocalMemory`] - an in-process implementation
//! - [`map`] - fixed register and window addresses
//!
//! # Example
//!
//! ```
//! use adsp_simbridge::memory::{LocalMemory, RemoteMemory};
//!
//! # tokio_test::block_on(async {
//! let mem = LocalMemory::with_bytes(0x100, b"hello");
//! assert_eq!(mem.read_bytes(0x101, 3).await.unwrap().as_ref(), b"ell");
//! # });
//! ```

mod access;
mod local;
pub mod map;
mod sim;

pub use access::{read_byte_length, RemoteMemory, WordSpan, MAX_READ_WORDS};
pub use local::LocalMemory;
pub use sim::SimMemory;
