//! Keep a Solys2 pointed at the sun or moon until interrupted.
//!
//! Settings come from an optional JSON file (see `automation::config`);
//! command-line flags override it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use automation::config::AutomationConfig;
use automation::{BodyTracker, PointingOffset, Worker};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use ephemeris::{Body, Observer, ProviderKind};
use hardware::solys::Solys2;
use hardware::SharedPositioner;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Solys2 Body Tracker
#[derive(Parser, Debug)]
#[command(name = "solys_track")]
#[command(about = "Track the sun or moon with a Solys2 until Ctrl-C")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Solys2 IP address or hostname
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    password: Option<String>,

    /// Body to track (sun or moon)
    #[arg(short, long)]
    body: Option<Body>,

    /// Position algorithm, e.g. sun-noaa or moon-safe
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Seconds between repositionings
    #[arg(short, long)]
    interval: Option<f64>,

    /// Fixed azimuth offset in degrees
    #[arg(long, allow_hyphen_values = true)]
    azimuth_offset: Option<f64>,

    /// Fixed zenith offset in degrees
    #[arg(long, allow_hyphen_values = true)]
    zenith_offset: Option<f64>,

    /// Observer latitude; requires --longitude
    #[arg(long, allow_hyphen_values = true, requires = "longitude")]
    latitude: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "latitude")]
    longitude: Option<f64>,

    /// Wait for the device to report each commanded position
    #[arg(long)]
    wait: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = apply_overrides(load_config(args.config.as_deref())?, &args);

    let tracking = config.tracking.to_tracking_config()?;
    let provider = config.tracking.provider()?;

    info!("Connecting to Solys2 at {}...", config.device.address());
    let mut solys = Solys2::connect(config.device.clone())?;
    if let Err(e) = solys.clock_offset() {
        warn!("Could not read the device clock: {e}");
    }

    let device = Arc::new(Mutex::new(solys));
    let positioner: SharedPositioner = device.clone();
    let mut tracker = BodyTracker::new(tracking, positioner, provider.build());
    if let Some(observer) = config.observer {
        tracker = tracker.with_observer(observer);
    }
    let mut worker = Worker::with_system_clock(tracker);
    // A stop also aborts a pending reconnect.
    device
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .set_cancel_token(worker.cancel_token());

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    info!("Tracking the {} with {provider}; press Ctrl-C to stop", config.tracking.body);
    worker.start()?;

    loop {
        match interrupt_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Interrupt received, stopping tracker");
                worker.stop()?;
                break;
            }
            Err(RecvTimeoutError::Timeout) if worker.is_finished() => {
                worker.wait()?;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    if let Some(tracker) = worker.schedule() {
        info!(
            "Tracker made {} moves, {} failed ticks",
            tracker.moves(),
            tracker.failures()
        );
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<AutomationConfig> {
    match path {
        Some(path) => AutomationConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(AutomationConfig::default()),
    }
}

fn apply_overrides(mut config: AutomationConfig, args: &Args) -> AutomationConfig {
    if let Some(host) = &args.host {
        config.device.host = host.clone();
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }
    if let Some(password) = &args.password {
        config.device.password = password.clone();
    }
    if let Some(body) = args.body {
        config.tracking.body = body;
    }
    if args.provider.is_some() {
        config.tracking.provider = args.provider;
    }
    if let Some(interval) = args.interval {
        config.tracking.interval = interval;
    }
    if args.azimuth_offset.is_some() || args.zenith_offset.is_some() {
        let base = config.tracking.offset.unwrap_or_default();
        config.tracking.offset = Some(PointingOffset::new(
            args.azimuth_offset.unwrap_or(base.azimuth),
            args.zenith_offset.unwrap_or(base.zenith),
        ));
    }
    if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
        config.observer = Some(Observer::new(latitude, longitude, 0.0));
    }
    if args.wait {
        config.tracking.wait_for_position = true;
    }
    config
}
