//! Simulator and debugger processes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::SimulatorConfig;
use crate::error::{BridgeError, Result};

/// Simulator command line for a config file and control port.
///
/// `--xtsc.turbo` is needed for HP-SRAM to be set up at all, and each
/// `--xxdebug=N` opens the debug socket of core N, without which that core
/// stays halted.
pub fn sim_args(config_file: &Path, port: u16) -> Vec<OsString> {
    let mut config_arg = OsString::from("--config=");
    config_arg.push(config_file);

    vec![
        "--platform=mtl".into(),
        config_arg,
        format!("--comm_port={}", port).into(),
        "--xtsc.turbo=true".into(),
        "--xxdebug=0".into(),
        "--xxdebug=1".into(),
        "--xxdebug=2".into(),
    ]
}

/// Resolve the simulator binary and the directory it must run in.
pub fn resolve_sim(sim_path: &Path) -> Result<(PathBuf, PathBuf)> {
    let sim = std::fs::canonicalize(sim_path).map_err(|e| {
        BridgeError::Launch(format!("Simulator {}: {}", sim_path.display(), e))
    })?;
    let dir = sim
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| BridgeError::Launch(format!("Simulator {} has no parent", sim.display())))?;
    Ok((sim, dir))
}

/// Start the simulator connecting back to `port`.
///
/// Both output streams are piped for the output monitors. The child is
/// killed when its handle is dropped.
pub fn launch_simulator(config: &SimulatorConfig, config_file: &Path, port: u16) -> Result<Child> {
    let (sim, dir) = resolve_sim(&config.sim_path)?;
    let args = sim_args(config_file, port);
    tracing::debug!("Launching {} {:?} in {}", sim.display(), args, dir.display());

    Command::new(&sim)
        .args(&args)
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Launch(format!("Simulator {}: {}", sim.display(), e)))
}

/// Debugger arguments that attach to `port` and let the core run.
pub fn gdb_args(port: u16) -> Vec<String> {
    vec![
        "-ex".to_string(),
        format!("target remote :{}", port),
        "-ex".to_string(),
        "continue".to_string(),
    ]
}

/// Start a background debugger that releases the core behind `port`.
///
/// Its output is discarded. The debugger is killed when the returned
/// handle is dropped.
pub fn launch_debugger(gdb: &str, port: u16) -> Result<Child> {
    Command::new(gdb)
        .args(gdb_args(port))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Launch(format!("Debugger {}: {}", gdb, e)))
}
