//! metronome - many timers, one background waiter.
//!
//! Usage:
//!   metronome run <HALF_PERIOD_NS>   Drive two toggling clocks, then speed one up
//!   metronome watch <SCHEDULE>       Log every expiration of one timer
//!   metronome check-config <PATH>    Validate a registry configuration file

use clap::{Parser, Subcommand};
use metronome::{
    BackendKind, ClockGenerator, ConfigLoader, RegistryConfig, Schedule, TimerId, TimerRegistry,
    parse_duration,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Half periods above this are replaced by [`FALLBACK_HALF_PERIOD`].
const MAX_HALF_PERIOD: Duration = Duration::from_secs(5);
const FALLBACK_HALF_PERIOD: Duration = Duration::from_secs(2);

/// metronome - many timers, one background waiter
#[derive(Parser)]
#[command(name = "metronome")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registry configuration file (YAML)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the backend from the configuration
    #[arg(short, long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive two clocks that toggle a flag every half period
    Run {
        /// Clock half period in nanoseconds
        #[arg(value_name = "HALF_PERIOD_NS")]
        half_period_ns: u64,

        /// How long to run before speeding up the first clock
        #[arg(long, default_value = "5s", value_parser = parse_duration)]
        run_for: Duration,
    },

    /// Register one timer and log every expiration
    Watch {
        /// Schedule expression, e.g. "@every 250ms" or "@after 1s"
        #[arg(value_name = "SCHEDULE")]
        schedule: String,

        /// How long to watch
        #[arg(long, default_value = "3s", value_parser = parse_duration)]
        run_for: Duration,
    },

    /// Validate a registry configuration file
    CheckConfig {
        /// Path to the YAML file
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            half_period_ns,
            run_for,
        } => {
            let config = load_config(cli.config, cli.backend)?;
            run_clocks(config, half_period_ns, run_for)?;
        }
        Commands::Watch { schedule, run_for } => {
            let config = load_config(cli.config, cli.backend)?;
            watch(config, &schedule, run_for)?;
        }
        Commands::CheckConfig { path } => {
            check_config(path)?;
        }
    }

    Ok(())
}

fn load_config(
    path: Option<PathBuf>,
    backend: Option<BackendKind>,
) -> Result<RegistryConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => ConfigLoader::load_registry_config(&path)?,
        None => RegistryConfig::default(),
    };
    if let Some(backend) = backend {
        config = config.with_backend(backend);
    }
    Ok(config)
}

fn toggle(id: TimerId, clk: &Arc<AtomicBool>) {
    let level = !clk.fetch_xor(true, Ordering::Relaxed);
    info!(timer_id = %id, clk = u8::from(level), "Clock tick");
}

fn run_clocks(
    config: RegistryConfig,
    half_period_ns: u64,
    run_for: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut half_period = Duration::from_nanos(half_period_ns);
    if half_period > MAX_HALF_PERIOD {
        warn!(
            requested = ?half_period,
            using = ?FALLBACK_HALF_PERIOD,
            "Half period longer than {:?}, falling back",
            MAX_HALF_PERIOD
        );
        half_period = FALLBACK_HALF_PERIOD;
    }
    if half_period.is_zero() {
        return Err("invalid half period 0 ns".into());
    }

    info!(backend = %config.backend, half_period = ?half_period, "Starting clocks");
    let clocks = ClockGenerator::new(config);

    let first = clocks.create(half_period, toggle, Arc::new(AtomicBool::new(false)))?;
    let second = match clocks.create(half_period, toggle, Arc::new(AtomicBool::new(false))) {
        Ok(id) => id,
        Err(e) => {
            clocks.destroy(first);
            return Err(e.into());
        }
    };

    thread::sleep(run_for);

    let faster = half_period / 2;
    let result = clocks.update(first, faster);
    match &result {
        Ok(_) => {
            info!(timer_id = %first, half_period = ?faster, "Clock sped up");
            thread::sleep(run_for / 2);
        }
        Err(e) => warn!(timer_id = %first, error = %e, "Failed to update clock"),
    }

    clocks.destroy(first);
    clocks.destroy(second);
    info!("Clocks destroyed");

    result.map(|_| ()).map_err(Into::into)
}

fn watch(
    config: RegistryConfig,
    expression: &str,
    run_for: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let schedule = Schedule::parse(expression)?;
    let registry = TimerRegistry::new(config);

    let id = registry.register_fn(schedule.interval(), schedule.kind(), |id| {
        info!(timer_id = %id, "Timer fired");
    })?;
    info!(
        timer_id = %id,
        interval = ?schedule.interval(),
        kind = %schedule.kind(),
        "Watching timer"
    );

    thread::sleep(run_for);
    registry.shutdown();
    Ok(())
}

fn check_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Checking {}", path.display());

    let config = ConfigLoader::load_registry_config(&path)?;
    println!("Configuration OK");
    println!("  backend:                 {}", config.backend);
    println!("  poll_timeout:            {:?}", config.poll_timeout);
    println!("  max_timers:              {}", config.max_timers);
    println!("  thread_name:             {}", config.thread_name);
    println!(
        "  auto_cancel_single_shot: {}",
        config.auto_cancel_single_shot
    );

    Ok(())
}
