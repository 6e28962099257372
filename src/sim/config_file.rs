//! Simulator configuration file.
//!
//! The simulator takes its image paths and timing parameters from an INI
//! style file named by `--config`. The file lives in a temporary location
//! for as long as the [`SimConfigFile`] is alive.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::SimulatorConfig;
use crate::error::Result;

/// Simulated wall clock increment per tick.
pub const WALL_CLOCK_INC: u32 = 240;

/// Simulator tick period.
pub const TICK_PERIOD: u32 = 10;

/// Render the file contents.
///
/// Missing images are written as empty values.
pub fn render(config: &SimulatorConfig) -> String {
    fn path_or_empty(path: &Option<PathBuf>) -> String {
        path.as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "[binaries]");
    let _ = writeln!(out, "bin_rom         = {}", path_or_empty(&config.rom_path));
    let _ = writeln!(out, "bin_fw          = {}", path_or_empty(&config.firmware_path));
    let _ = writeln!(out, "[parameters]");
    let _ = writeln!(out, "wall_clock_inc = {}", WALL_CLOCK_INC);
    let _ = writeln!(out, "tick_period    = {}", TICK_PERIOD);
    let _ = writeln!(out, "verb_level     = {}", config.verbosity.verb_level());
    let _ = writeln!(out, "[fabric_params]");
    let _ = writeln!(out, "turbo_hpsram    = true");
    let _ = writeln!(out, "turbo_lpsram    = true");
    out
}

/// A written config file. Deleted on drop.
#[derive(Debug)]
pub struct SimConfigFile {
    file: NamedTempFile,
}

impl SimConfigFile {
    /// Render `config` into a fresh temporary file.
    pub fn write(config: &SimulatorConfig) -> Result<Self> {
        let mut file = NamedTempFile::new()?;
        file.write_all(render(config).as_bytes())?;
        file.flush()?;
        tracing::debug!("Simulator config written to {}", file.path().display());
        Ok(Self { file })
    }

    /// Path to pass as `--config`.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
