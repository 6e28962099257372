//! Error types for adsp-simbridge.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the simulator socket, a pipe or the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (malformed frame, bad length, short read response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection to the simulator closed, or the session is shutting down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No listening port could be bound within the attempt budget.
    #[error("Failed to find a port to communicate with ACE simulator after {attempts} attempts")]
    PortExhausted {
        /// Number of bind attempts made.
        attempts: u32,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Simulator or debugger process could not be started.
    #[error("Launch error: {0}")]
    Launch(String),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
