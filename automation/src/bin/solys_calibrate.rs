//! Calibration sweeps and dark measurements with a Solys2.
//!
//! Subcommands:
//! - `cross`: Sweep each axis separately through the body position
//! - `mesh`: Sweep the full grid of azimuth and zenith offsets
//! - `black`: Point away from the body and read the sun sensor
//!
//! Without `--instrument-cmd`, each `COUNTDOWN:0` log line is the cue to take
//! the measurement by hand.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use automation::calibration::{measure_black, AxisRange};
use automation::config::AutomationConfig;
use automation::{CalibrationWorker, PatternKind, Worker};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use ephemeris::{Body, Observer, ProviderKind};
use hardware::solys::Solys2;
use hardware::SharedPositioner;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Solys2 Calibration Tool
#[derive(Parser, Debug)]
#[command(name = "solys_calibrate")]
#[command(about = "Run calibration sweeps around the sun or moon")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Solys2 IP address or hostname
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Body to calibrate against (sun or moon)
    #[arg(short, long, global = true)]
    body: Option<Body>,

    /// Position algorithm, e.g. sun-noaa or moon-safe
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    #[arg(long, global = true, allow_hyphen_values = true, requires = "longitude")]
    latitude: Option<f64>,

    #[arg(long, global = true, allow_hyphen_values = true, requires = "latitude")]
    longitude: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One axis at a time through the body position
    Cross(SweepArgs),

    /// Full grid of azimuth and zenith offsets
    Mesh(SweepArgs),

    /// Point away from the body and read the sun sensor
    Black,
}

#[derive(clap::Args, Debug)]
struct SweepArgs {
    /// Azimuth offsets as MIN:MAX:STEP in degrees, e.g. -1:1:0.1
    #[arg(long, allow_hyphen_values = true, value_parser = parse_range)]
    azimuth: Option<AxisRange>,

    /// Zenith offsets as MIN:MAX:STEP in degrees
    #[arg(long, allow_hyphen_values = true, value_parser = parse_range)]
    zenith: Option<AxisRange>,

    /// Seconds from each move to the measurement (0 disables)
    #[arg(long)]
    countdown: Option<f64>,

    /// Seconds the instrument needs per point
    #[arg(long)]
    instrument_delay: Option<f64>,

    /// Seconds to wait after each measurement
    #[arg(long)]
    post_wait: Option<f64>,

    /// Shell command run at every point, e.g. "capture --exposure 2"
    #[arg(long)]
    instrument_cmd: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = apply_overrides(load_config(args.config.as_deref())?, &args);

    info!("Connecting to Solys2 at {}...", config.device.address());
    let mut solys = Solys2::connect(config.device.clone())?;
    if let Err(e) = solys.clock_offset() {
        warn!("Could not read the device clock: {e}");
    }
    let device = Arc::new(Mutex::new(solys));
    let positioner: SharedPositioner = device.clone();
    let provider = config.calibration.provider()?;

    match args.command {
        Command::Cross(sweep) => cmd_sweep(PatternKind::Cross, &config, sweep, device, positioner),
        Command::Mesh(sweep) => cmd_sweep(PatternKind::Mesh, &config, sweep, device, positioner),
        Command::Black => {
            let result = measure_black(
                &positioner,
                provider.build().as_ref(),
                config.observer,
                OffsetDateTime::now_utc(),
            )?;
            info!(
                "Dark position az={:.4} ze={:.4}",
                result.reported.0, result.reported.1
            );
            Ok(())
        }
    }
}

fn cmd_sweep(
    kind: PatternKind,
    config: &AutomationConfig,
    sweep: SweepArgs,
    device: Arc<Mutex<Solys2>>,
    positioner: SharedPositioner,
) -> Result<()> {
    let mut parameters = config.calibration.parameters.clone();
    if let Some(azimuth) = sweep.azimuth {
        parameters.azimuth = azimuth;
    }
    if let Some(zenith) = sweep.zenith {
        parameters.zenith = zenith;
    }
    if let Some(countdown) = sweep.countdown {
        parameters.countdown = countdown;
    }
    if let Some(delay) = sweep.instrument_delay {
        parameters.instrument_delay = delay;
    }
    if let Some(post_wait) = sweep.post_wait {
        parameters.post_wait = post_wait;
    }

    let provider = config.calibration.provider()?;
    let mut calibration = CalibrationWorker::new(kind, parameters, positioner, provider.build());
    if let Some(observer) = config.observer {
        calibration = calibration.with_observer(observer);
    }
    if let Some(command) = sweep.instrument_cmd {
        calibration = calibration.with_instrument(move || run_instrument(&command));
    }

    let mut worker = Worker::with_system_clock(calibration);
    device
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .set_cancel_token(worker.cancel_token());

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    worker.start()?;
    let result = loop {
        match interrupt_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Interrupt received, stopping calibration");
                break worker.stop();
            }
            Err(RecvTimeoutError::Timeout) if worker.is_finished() => break worker.wait(),
            Err(RecvTimeoutError::Timeout) => {}
        }
    };

    if let Some(calibration) = worker.schedule() {
        info!("{}", calibration.report());
    }
    result?;
    Ok(())
}

fn run_instrument(command: &str) -> Result<()> {
    let status = process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .with_context(|| format!("failed to run '{command}'"))?;
    if !status.success() {
        bail!("'{command}' exited with {status}");
    }
    Ok(())
}

fn parse_range(s: &str) -> Result<AxisRange, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [min, max, step] = parts.as_slice() else {
        return Err(format!("expected MIN:MAX:STEP, got '{s}'"));
    };
    let number = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("'{v}': {e}"));
    Ok(AxisRange::new(number(*min)?, number(*max)?, number(*step)?))
}

fn load_config(path: Option<&Path>) -> Result<AutomationConfig> {
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
        config.calibration.body = body;
    }
    if args.provider.is_some() {
        config.calibration.provider = args.provider;
    }
    if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
        config.observer = Some(Observer::new(latitude, longitude, 0.0));
    }
    config
}
