//! # adsp-simbridge
//!
//! Control bridge for the ACE 1.x (Meteor Lake) audio DSP simulator.
//!
//! The simulator runs as a child process and connects back over TCP. It
//! speaks a small protocol of little-endian 32-bit words and stalls its
//! own clock unless every frame it sends is answered. This crate keeps it
//! running, brings the DSP out of reset, and streams the firmware's trace
//! buffer out of simulated memory.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): frame layout and incremental parsing
//! - **Session** ([`session`]): dispatch loop and mandatory heartbeats
//! - **Memory** ([`memory`]): word/byte reads and writes over the socket
//! - **Winstream** ([`winstream`]): lock-free ring buffer snapshots
//! - **Bootstrap** ([`bootstrap`]): listener, simulator launch, start-up
//!
//! ## Example
//!
//! ```ignore
//! use adsp_simbridge::{config::BridgeConfig, Bridge};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> adsp_simbridge::Result<()> {
//!     let bridge = Bridge::new(BridgeConfig::new("/opt/sim/dsp_mtl_sim"))?;
//!     bridge.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod tracker;
pub mod transport;
pub mod winstream;
pub mod writer;

pub use bootstrap::Bridge;
pub use error::{BridgeError, Result};
pub use session::{SessionEnd, SessionState};
