//! mtlsim - run the ACE 1.x simulator with firmware trace output.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use adsp_simbridge::config::{BridgeConfig, Verbosity};
use adsp_simbridge::winstream::ReadMode;
use adsp_simbridge::{Bridge, SessionEnd};

#[derive(Parser, Debug)]
#[command(name = "mtlsim")]
#[command(about = "Run ACE 1.x Simulator", long_about = None)]
#[command(version)]
struct Args {
    /// Path to built simulator binary
    #[arg(short, long, env = "ADSP_SIM")]
    sim: PathBuf,

    /// Path to built rimage binary
    #[arg(short = 'm', long, env = "ADSP_RIMAGE")]
    rimage: Option<PathBuf>,

    /// Path to zephyr.ri
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Path to built ROM binary
    #[arg(short, long, env = "ADSP_ROM")]
    rom: Option<PathBuf>,

    /// Display extra simulator output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all simulator logging, show only Zephyr output
    #[arg(short, long)]
    quiet: bool,

    /// Don't start cores automatically, use external gdb
    #[arg(short = 'd', long)]
    start_halted: bool,

    /// Don't read trace output from shared memory window
    #[arg(short = 'w', long)]
    no_window_trace: bool,

    /// Trace window poll interval in milliseconds
    #[arg(long, default_value = "200")]
    poll_interval_ms: u64,

    /// Re-check the trace window after each copy and retry torn reads
    #[arg(long)]
    strict_winstream: bool,

    /// Debugger used to start cores
    #[arg(long, default_value = "xt-gdb")]
    gdb: String,

    /// Attempts at binding a random control port
    #[arg(long, default_value = "10")]
    port_attempts: u32,
}

impl Args {
    fn into_config(self) -> BridgeConfig {
        let mut config = BridgeConfig::new(self.sim);

        config.listen.attempts = self.port_attempts;

        config.simulator.rom_path = self.rom;
        config.simulator.firmware_path = self.rimage;
        config.simulator.verbosity = Verbosity::from_flags(self.quiet, self.verbose);
        config.simulator.start_halted = self.start_halted;
        config.simulator.gdb_path = self.gdb;

        config.trace.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config.trace.emit = !self.no_window_trace;
        if self.strict_winstream {
            config.trace.read_mode = ReadMode::strict();
        }

        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Some(image) = &args.image {
        tracing::debug!("Ignoring --image {}", image.display());
    }

    let result = run(args.into_config()).await;
    restore_terminal();
    result
}

async fn run(config: BridgeConfig) -> Result<()> {
    let bridge = Bridge::new(config).context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        on_interrupt.cancel();
    });

    match bridge.run(cancel).await.context("Simulator session failed")? {
        SessionEnd::Goodbye => info!("Simulator exited"),
        SessionEnd::Cancelled => info!("Session cancelled"),
    }
    Ok(())
}

/// Initialize tracing/logging. Logs go to stderr; stdout is simulator text.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// The simulator leaves the terminal in raw mode when it dies.
fn restore_terminal() {
    #[cfg(unix)]
    {
        use std::io::IsTerminal;

        if std::io::stdout().is_terminal() {
            let _ = std::process::Command::new("stty").arg("sane").status();
        }
    }
}
