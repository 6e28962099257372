//! TCP listener the simulator connects back to.
//!
//! The simulator is told the port on its command line and connects once.
//! Ports are picked at random from a range; a port that is taken (often a
//! previous run still in TIME_WAIT) costs one attempt.
//!
//! # Example
//!
//! ```ignore
//! use adsp_simbridge::config::ListenConfig;
//! use adsp_simbridge::transport::acquire_listener;
//!
//! let listener = acquire_listener(&ListenConfig::default()).await?;
//! println!("ACE simulator comm port = {}", listener.port());
//! let stream = listener.accept().await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::ops::RangeInclusive;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ListenConfig;
use crate::error::{BridgeError, Result};

/// Bound listening socket.
#[derive(Debug)]
pub struct SimListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl SimListener {
    /// Bind `host:port`. Port 0 lets the OS choose.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept a single connection.
    ///
    /// Nagle is disabled: every inbound frame waits on a tiny heartbeat.
    pub async fn accept(&self) -> Result<TcpStream> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!("Simulator connected from {}", peer);
        Ok(stream)
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Draw a port uniformly from `range`.
pub fn random_port(range: &RangeInclusive<u16>) -> u16 {
    rand::thread_rng().gen_range(range.clone())
}

/// Try `bind` on up to `attempts` ports produced by `pick_port`.
///
/// Returns the first success. Each failure is logged and costs one
/// attempt; once the budget is spent the result is
/// [`BridgeError::PortExhausted`].
pub async fn acquire_with<T, P, B, Fut>(attempts: u32, mut pick_port: P, mut bind: B) -> Result<T>
where
    P: FnMut() -> u16,
    B: FnMut(u16) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=attempts {
        let port = pick_port();
        match bind(port).await {
            Ok(bound) => return Ok(bound),
            Err(e) => {
                tracing::debug!(
                    "Bind on port {} failed (attempt {}/{}): {}",
                    port,
                    attempt,
                    attempts,
                    e
                );
            }
        }
    }

    Err(BridgeError::PortExhausted { attempts })
}

/// Bind a listener on a random port from `config.port_range`.
pub async fn acquire_listener(config: &ListenConfig) -> Result<SimListener> {
    let host = config.host.as_str();
    let range = config.port_range.clone();

    acquire_with(
        config.attempts,
        || random_port(&range),
        move |port| SimListener::bind(host, port),
    )
    .await
}
