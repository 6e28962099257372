//! Transport module - the simulator control socket.
//!
//! Provides:
//! - [`SimListener`] - TCP listener the simulator connects back to
//! - [`acquire_listener`] - bind with bounded random-port retry

mod tcp;

pub use tcp::{acquire_listener, acquire_with, random_port, SimListener};
