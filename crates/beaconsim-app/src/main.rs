use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use beaconsim_app::command::{create_command_bus, drain_pending_commands};
use beaconsim_core::{NullDeviceConfigurator, NullTelemetry, SimulationConfig, StaggerPolicy, World};
use beaconsim_uplink::{UplinkConfig, UplinkPipeline};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "beaconsim",
    version,
    about = "Flocking beacon-scanner simulator pushing telemetry to a backend"
)]
struct Cli {
    /// Base URL of the backend receiving telemetry and device directives.
    #[arg(
        long,
        env = "BEACONSIM_BACKEND_URL",
        default_value = "http://127.0.0.1:5000"
    )]
    backend_url: String,

    /// Number of scanners to seed (clamped to the declared bounds).
    #[arg(long)]
    scanners: Option<usize>,

    /// RNG seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,

    /// Telemetry cadence in milliseconds (clamped to the declared bounds).
    #[arg(long)]
    emit_interval_ms: Option<u64>,

    /// Stagger first emissions instead of bursting them together.
    #[arg(long)]
    staggered: bool,

    /// Stop after this many ticks; 0 runs until interrupted.
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Skip the HTTP uplink entirely (headless/dry runs).
    #[arg(long)]
    no_uplink: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = SimulationConfig {
        rng_seed: cli.seed,
        ..SimulationConfig::default()
    };
    if let Some(count) = cli.scanners {
        config.scanner_count = count;
    }
    if let Some(interval) = cli.emit_interval_ms {
        config.emit_interval_ms = interval;
    }
    if cli.staggered {
        config.stagger = StaggerPolicy::Staggered;
    }

    let pipeline = if cli.no_uplink {
        None
    } else {
        Some(UplinkPipeline::connect(UplinkConfig::new(
            cli.backend_url.clone(),
        ))?)
    };

    let mut world = match &pipeline {
        Some(pipeline) => World::with_sinks(
            config,
            Box::new(pipeline.telemetry_sink()),
            Box::new(pipeline.device_configurator()),
        )?,
        None => World::with_sinks(
            config,
            Box::new(NullTelemetry),
            Box::new(NullDeviceConfigurator),
        )?,
    };

    let (_command_sender, command_receiver) = create_command_bus(64);

    info!(
        scanners = world.scanner_count(),
        beacons = world.beacons().len(),
        backend = %cli.backend_url,
        uplink = !cli.no_uplink,
        "starting beaconsim"
    );

    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(world.config().tick_rate_hz));
    let mut next_deadline = Instant::now() + tick_duration;
    let mut reports_total: u64 = 0;

    loop {
        drain_pending_commands(&command_receiver, &mut world);
        let events = world.step();
        reports_total += events.reports_emitted as u64;

        if cli.ticks != 0 && events.tick.0 >= cli.ticks {
            break;
        }

        match next_deadline.checked_duration_since(Instant::now()) {
            Some(wait) => thread::sleep(wait),
            None => next_deadline = Instant::now(),
        }
        next_deadline += tick_duration;
    }

    info!(
        ticks = world.tick().0,
        reports = reports_total,
        "simulation finished"
    );
    if let Some(pipeline) = &pipeline {
        if pipeline.dropped_jobs() > 0 {
            warn!(
                dropped = pipeline.dropped_jobs(),
                "some uplink payloads were dropped"
            );
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
