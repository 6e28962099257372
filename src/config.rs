//! Runtime configuration for the bridge.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::memory::map::TRACE_WINDOW;
use crate::session::DEFAULT_GDB_PATH;
use crate::winstream::ReadMode;

/// Default range the listening port is drawn from.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 40000..=50000;

/// Default number of bind attempts.
pub const DEFAULT_PORT_ATTEMPTS: u32 = 10;

/// Default trace poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How chatty the simulator and the bridge are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only firmware trace output.
    Quiet,
    #[default]
    Normal,
    /// Extra simulator output and bridge diagnostics.
    Verbose,
}

impl Verbosity {
    /// From the `--quiet`/`--verbose` pair. Verbose wins if both are set.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (_, true) => Verbosity::Verbose,
            (true, false) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    /// Simulator `verb_level` (0-4: off, crit, normal, verbose, very verbose).
    pub fn verb_level(self) -> u8 {
        match self {
            Verbosity::Quiet => 0,
            Verbosity::Normal => 1,
            Verbosity::Verbose => 3,
        }
    }

    /// Whether simulator output is suppressed entirely.
    pub fn is_quiet(self) -> bool {
        self == Verbosity::Quiet
    }
}

/// Listening socket the simulator connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// Interface to bind.
    pub host: String,
    /// Ports candidates are drawn from.
    pub port_range: RangeInclusive<u16>,
    /// Bind attempts before giving up.
    pub attempts: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_range: DEFAULT_PORT_RANGE,
            attempts: DEFAULT_PORT_ATTEMPTS,
        }
    }
}

impl ListenConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(BridgeError::Config(
                "Port attempts must be greater than 0".to_string(),
            ));
        }
        if self.port_range.is_empty() {
            return Err(BridgeError::Config(format!(
                "Empty port range {}..={}",
                self.port_range.start(),
                self.port_range.end()
            )));
        }
        if *self.port_range.start() == 0 {
            return Err(BridgeError::Config(
                "Port range must not include port 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Simulator process and its config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Simulator binary. It is run from its own directory.
    pub sim_path: PathBuf,
    /// ROM image.
    pub rom_path: Option<PathBuf>,
    /// Signed firmware image.
    pub firmware_path: Option<PathBuf>,
    /// Output and `verb_level`.
    pub verbosity: Verbosity,
    /// Leave cores halted for an external debugger.
    pub start_halted: bool,
    /// Debugger used until the simulator reports its own tool path.
    pub gdb_path: String,
}

impl SimulatorConfig {
    /// Config for the simulator at `sim_path`, everything else default.
    pub fn new(sim_path: impl Into<PathBuf>) -> Self {
        Self {
            sim_path: sim_path.into(),
            rom_path: None,
            firmware_path: None,
            verbosity: Verbosity::default(),
            start_halted: false,
            gdb_path: DEFAULT_GDB_PATH.to_string(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sim_path.as_os_str().is_empty() {
            return Err(BridgeError::Config("Simulator path is empty".to_string()));
        }
        if self.gdb_path.is_empty() {
            return Err(BridgeError::Config("Debugger path is empty".to_string()));
        }
        Ok(())
    }
}

/// Firmware trace polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    /// Winstream header address.
    pub window_address: u32,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Snapshot consistency.
    pub read_mode: ReadMode,
    /// Print trace bytes. When off the window is still polled.
    pub emit: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            window_address: TRACE_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_mode: ReadMode::Relaxed,
            emit: true,
        }
    }
}

impl TraceConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(BridgeError::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }
        if self.window_address % 4 != 0 {
            return Err(BridgeError::Config(format!(
                "Trace window 0x{:08x} is not word aligned",
                self.window_address
            )));
        }
        Ok(())
    }
}

/// Everything [`Bridge`](crate::bootstrap::Bridge) needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub listen: ListenConfig,
    pub simulator: SimulatorConfig,
    pub trace: TraceConfig,
}

impl BridgeConfig {
    /// Defaults for the simulator at `sim_path`.
    pub fn new(sim_path: impl Into<PathBuf>) -> Self {
        Self {
            listen: ListenConfig::default(),
            simulator: SimulatorConfig::new(sim_path),
            trace: TraceConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.listen.validate()?;
        self.simulator.validate()?;
        self.trace.validate()
    }
}
