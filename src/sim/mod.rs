//! Sim module - the simulator as a child process.
//!
//! Provides:
//! - [`SimConfigFile`] - the `--config` file handed to the simulator
//! - [`launch_simulator`] / [`launch_debugger`] - process spawning
//! - [`OutputMonitor`] - stdout/stderr filtering and core start-up

pub mod config_file;
pub mod launcher;
pub mod output;

pub use config_file::SimConfigFile;
pub use launcher::{launch_debugger, launch_simulator};
pub use output::OutputMonitor;
