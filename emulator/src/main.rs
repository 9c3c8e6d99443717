mod clock;
mod diagnostics;
mod line;
mod session;
mod store;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;
use clap::Parser;
use meter_core::config::{CONFIG_PATH, Config};
use meter_core::debounce::{DEFAULT_TICK, DEFAULT_WINDOW_TICKS};
use meter_core::store::Storage;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use clock::{HostClock, SimulatedClock, SystemClock};
use line::SimulatedLine;
use session::{SessionEnd, SessionSettings};
use store::DirStore;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Reed-switch water meter emulator")]
struct Cli {
    /// Directory holding the emulated flash files
    #[arg(short, long, default_value = "meter-data")]
    data_dir: PathBuf,

    /// Emulated flash capacity in bytes
    #[arg(long, default_value_t = 256 * 1024)]
    capacity: usize,

    /// Run a simulated clock from this local time (e.g. 2024-05-06T01:59:00)
    #[arg(long)]
    start: Option<NaiveDateTime>,

    /// Speed-up factor of the simulated clock
    #[arg(long, default_value_t = 1)]
    speed: u32,

    /// Debounce window in milliseconds
    #[arg(long, default_value_t = DEFAULT_WINDOW_TICKS)]
    window_ms: u16,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    let store = DirStore::open(&cli.data_dir, cli.capacity)
        .map_err(|err| anyhow!("{err}: {}", cli.data_dir.display()))?;
    if !store.exists(CONFIG_PATH) {
        Config::default()
            .write_to(&store)
            .map_err(|err| anyhow!("writing default config: {err}"))?;
        info!(path = %store.root().join(&CONFIG_PATH[1..]).display(), "wrote default config");
    }

    // The meter reloads the config on every boot; only the clock needs it here.
    let config = Config::load(&store)
        .map_err(|err| anyhow!("reading config: {err}"))?
        .unwrap_or_default();
    let mut clock = match cli.start {
        Some(start) => HostClock::Simulated(SimulatedClock::new(start, cli.speed)),
        None => HostClock::System(
            SystemClock::new(config.timezone_offset_hours)
                .context("timezone offset out of range")?,
        ),
    };

    let settings = SessionSettings {
        sample_period: DEFAULT_TICK,
        window_ticks: cli.window_ms,
        poll_period: Duration::from_millis(10),
    };
    let line = Arc::new(SimulatedLine::new());
    let commands = spawn_input_reader();

    println!("Water meter emulator ready. Type `help` for commands or `exit` to quit.");
    loop {
        match session::run(&store, clock, &line, &commands, &settings)? {
            SessionEnd::Restart(next) => clock = next,
            SessionEnd::Exit => break,
        }
    }
    println!("Session closed.");
    Ok(())
}

fn spawn_input_reader() -> mpsc::Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

fn setup_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("meter_emulator=debug")
        } else {
            EnvFilter::new("meter_emulator=info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}
