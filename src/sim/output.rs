//! Simulator stdout/stderr monitor.
//!
//! Echoes simulator output, drops the per-IPI chatter, and watches for two
//! kinds of line:
//!
//! - `PREBUILT: xt-bin-path: <dir>` names the toolchain the simulator was
//!   built with; its `xt-gdb` becomes the session debugger.
//! - `NOTE core<N> ... Debug info: ... port=<P>` announces the debug socket
//!   of core N. The port is not predictable (the simulator bumps it when
//!   the preferred one is busy), so the debugger that releases the core is
//!   launched from here.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::session::SessionState;
use crate::sim::launcher::launch_debugger;

const PREBUILT_PREFIX: &str = "PREBUILT: xt-bin-path: ";
const IDC_DONE: &str = "IDC DONE INTERRUPT ON CORE";

/// Whether `line` is inter-core interrupt noise.
///
/// Matches `DSP<d> -> DSP<d> IDC msg:` anywhere in the line, and
/// `IDC DONE INTERRUPT ON CORE`.
pub fn is_suppressed(line: &str) -> bool {
    line.contains(IDC_DONE) || contains_idc_msg(line)
}

fn contains_idc_msg(line: &str) -> bool {
    line.match_indices("DSP").any(|(i, _)| {
        let rest = line[i + 3..].as_bytes();
        let prefix = b" -> DSP";
        let suffix = b" IDC msg:";
        let second = 1 + prefix.len();
        rest.len() >= second + 1 + suffix.len()
            && rest[0].is_ascii_digit()
            && &rest[1..second] == prefix
            && rest[second].is_ascii_digit()
            && &rest[second + 1..second + 1 + suffix.len()] == suffix
    })
}

/// Toolchain directory from a `PREBUILT: xt-bin-path:` line.
pub fn parse_prebuilt(line: &str) -> Option<&str> {
    line.trim_end().strip_prefix(PREBUILT_PREFIX)
}

/// `(core, port)` from a core debug announcement.
///
/// The line must start with `NOTE`, whitespace, `core<N>` and whitespace,
/// and later contain `Debug info:` followed somewhere by `port=<P>`. With
/// several `port=` fields the last one wins.
pub fn parse_core_debug(line: &str) -> Option<(u32, u16)> {
    let rest = line.strip_prefix("NOTE")?;
    let trimmed = rest.trim_start();
    if trimmed.len() == rest.len() {
        return None;
    }

    let rest = trimmed.strip_prefix("core")?;
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let core = rest[..digits].parse().ok()?;
    let rest = &rest[digits..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let (_, info) = rest.split_once("Debug info:")?;
    let port = info.rmatch_indices("port=").find_map(|(i, field)| {
        let value = &info[i + field.len()..];
        let end = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        (end > 0).then(|| &value[..end])
    })?;

    Some((core, port.parse().ok()?))
}

/// Line handler for one simulator output stream.
#[derive(Debug, Clone)]
pub struct OutputMonitor {
    state: Arc<SessionState>,
    quiet: bool,
    start_halted: bool,
}

impl OutputMonitor {
    /// Monitor recording discoveries in `state`.
    pub fn new(state: Arc<SessionState>, quiet: bool, start_halted: bool) -> Self {
        Self {
            state,
            quiet,
            start_halted,
        }
    }

    /// Process lines from `reader` until EOF or cancellation.
    ///
    /// Debuggers started along the way are killed when this returns.
    pub async fn run<R, W>(self, reader: R, mut out: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        let mut debuggers = Vec::new();

        loop {
            raw.clear();
            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = reader.read_until(b'\n', &mut raw) => read?,
            };
            if n == 0 {
                return Ok(());
            }

            let line = String::from_utf8_lossy(&raw);
            self.handle_line(&line, &mut out, &mut debuggers).await?;
        }
    }

    async fn handle_line<W>(&self, line: &str, out: &mut W, debuggers: &mut Vec<Child>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.quiet && !is_suppressed(line) {
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;
        }

        if let Some(dir) = parse_prebuilt(line) {
            let gdb = Path::new(dir).join("xt-gdb");
            tracing::debug!("Using debugger {}", gdb.display());
            self.state.set_gdb_path(gdb.to_string_lossy());
        }

        let Some((core, port)) = parse_core_debug(line) else {
            return Ok(());
        };

        if !self.quiet || self.start_halted {
            let note = format!(
                "Core {} active:(start with \"(xt-gdb) target remote :{}\")\n",
                core, port
            );
            out.write_all(note.as_bytes()).await?;
            out.flush().await?;
        }

        if !self.start_halted {
            tracing::debug!("Launching GDB to start core {}", core);
            match launch_debugger(&self.state.gdb_path(), port) {
                Ok(child) => debuggers.push(child),
                Err(e) => tracing::warn!("Core {} stays halted: {}", core, e),
            }
        }
        Ok(())
    }
}
