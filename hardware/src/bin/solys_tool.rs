//! Command-line tool for direct Solys2 control.
//!
//! Subcommands:
//! - `query`: Print position, adjustments, location and queue state
//! - `status`: Decode the instrument status flags
//! - `move`: Move to an azimuth/zenith pair
//! - `home`: Start homing
//! - `raw`: Send a raw command and print the reply
//! - `adjust`: Apply a small per-motor adjustment
//! - `time`: Compare the device clock with the host clock

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use hardware::solys::{ConnectionConfig, DeviceReply, Solys2, DEFAULT_PASSWORD, DEFAULT_PORT};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Solys2 Tracker Control Tool
#[derive(Parser, Debug)]
#[command(name = "solys_tool")]
#[command(about = "Query and command a Solys2 sun tracker")]
#[command(version)]
struct Args {
    /// Solys2 IP address or hostname
    #[arg(long, global = true, default_value = "localhost")]
    host: String,

    /// TCP port of the command interface
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Device password
    #[arg(long, global = true, default_value = DEFAULT_PASSWORD)]
    password: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query position, adjustments, location and motion queue
    Query,

    /// Decode the instrument status
    Status,

    /// Move to an absolute position
    Move {
        /// Azimuth in degrees (wrapped into 0..360)
        #[arg(short, long)]
        azimuth: f64,

        /// Zenith angle in degrees
        #[arg(short, long)]
        zenith: f64,
    },

    /// Start homing both motors
    Home,

    /// Send a raw command, e.g. `raw "PO 0 180"`
    Raw {
        command: String,
    },

    /// Adjust motors by up to ±0.2 degrees
    Adjust {
        #[arg(long, allow_hyphen_values = true)]
        azimuth: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        zenith: Option<f64>,
    },

    /// Show the device clock and its offset from the host
    Time,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ConnectionConfig {
        host: args.host,
        port: args.port,
        password: args.password,
        ..ConnectionConfig::default()
    };

    info!("Connecting to Solys2 at {}...", config.address());
    let mut solys = Solys2::connect(config)?;

    match args.command {
        Command::Query => cmd_query(&mut solys),
        Command::Status => cmd_status(&mut solys),
        Command::Move { azimuth, zenith } => {
            solys.set_position(azimuth, zenith)?;
            info!("Move to az={azimuth:.4} ze={zenith:.4} accepted");
            Ok(())
        }
        Command::Home => {
            solys.home()?;
            info!("Homing started");
            Ok(())
        }
        Command::Raw { command } => cmd_raw(&mut solys, &command),
        Command::Adjust { azimuth, zenith } => cmd_adjust(&mut solys, azimuth, zenith),
        Command::Time => {
            let device = solys.device_time()?;
            let offset = solys.clock_offset()?;
            info!("Device time: {device} (offset {:.3} s)", offset.as_seconds_f64());
            Ok(())
        }
    }
}

fn cmd_query(solys: &mut Solys2) -> Result<()> {
    let position = solys.get_current_position()?;
    info!(
        "Position: az={:.4} ze={:.4} ({:?})",
        position.azimuth, position.zenith, position.raw
    );

    let (az_adj, ze_adj) = solys.adjustment()?;
    info!("Adjustments: az={az_adj:.4} ze={ze_adj:.4}");

    let location = solys.location()?;
    info!(
        "Location: lat={:.5} lon={:.5} pressure={:?}",
        location.latitude, location.longitude, location.pressure
    );

    info!("Function: {}", solys.function()?);
    info!("Power save: {}", solys.power_save()?);
    info!("Queued segments: {:?}", solys.queue_status()?);
    Ok(())
}

fn cmd_status(solys: &mut Solys2) -> Result<()> {
    let status = solys.get_status()?;
    match status.function {
        Some(function) => info!("Mode {} ({function})", status.mode),
        None => info!("Mode {} (unknown)", status.mode),
    }
    info!("Active: {}", status.activated.join(", "));
    info!("Inactive: {}", status.deactivated.join(", "));
    info!("Raw: {:?}", status.raw);
    Ok(())
}

fn cmd_raw(solys: &mut Solys2, command: &str) -> Result<()> {
    match solys.send_command(command)? {
        DeviceReply::Answered { payload, raw } => {
            info!("{raw}");
            info!("Decoded: {payload:?}");
        }
        DeviceReply::Failed { code, raw } => {
            info!("{raw}");
            bail!("device error {code}");
        }
    }
    Ok(())
}

fn cmd_adjust(solys: &mut Solys2, azimuth: Option<f64>, zenith: Option<f64>) -> Result<()> {
    if azimuth.is_none() && zenith.is_none() {
        bail!("nothing to adjust, pass --azimuth and/or --zenith");
    }
    if let Some(degrees) = azimuth {
        solys.adjust_azimuth(degrees)?;
    }
    if let Some(degrees) = zenith {
        solys.adjust_zenith(degrees)?;
    }
    let (az_adj, ze_adj) = solys.adjustment()?;
    info!("Adjustments now: az={az_adj:.4} ze={ze_adj:.4}");
    Ok(())
}
