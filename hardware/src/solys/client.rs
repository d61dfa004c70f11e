//! Typed Solys2 command surface.

use time::{Date, Duration as TimeDuration, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::{debug, error, info, warn};

use super::connection::{Connection, ConnectionConfig};
use super::error::{SolysError, SolysResult};
use super::protocol::{Axis, Command, DeviceReply, ErrorCode, Payload};
use super::status::{DeviceStatus, TrackerFunction};
use crate::cancel::CancelToken;
use crate::positioner::Positioner;

/// Largest single `AD` adjustment the firmware accepts, in degrees.
pub const MAX_ADJUSTMENT_STEP: f64 = 0.2;

/// Zenith used to park the instrument facing the ground.
const POINT_DOWN_ZENITH: f64 = 94.9;

/// Device clock drift that is still considered in sync, in seconds.
const CLOCK_TOLERANCE_SECS: f64 = 2.0;

/// Position reported by `CP`.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentPosition {
    pub azimuth: f64,
    pub zenith: f64,
    pub raw: String,
}

/// Site configured on the device (`LL`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Atmospheric pressure in hPa, when the firmware reports it
    pub pressure: Option<f64>,
}

/// Four-quadrant sun sensor reading (`SI`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunIntensity {
    pub quadrants: [f64; 4],
    pub total: f64,
}

/// High-level driver for the Solys2 tracker.
///
/// Every operation goes through the [`Connection`] retry policy, so transport
/// failures and silent firmware are invisible to the caller. Device-reported
/// errors surface as [`SolysError::Protocol`]; protection errors are retried
/// once after re-authenticating.
///
/// The connection is half-duplex: only one caller (a worker or direct use)
/// may drive a given device at a time.
///
/// # Example
///
/// ```no_run
/// use hardware::solys::{ConnectionConfig, Solys2};
///
/// let mut solys = Solys2::connect(ConnectionConfig::for_host("192.168.1.9"))?;
/// let status = solys.get_status()?;
/// println!("Mode {:?}, active flags {:?}", status.function, status.activated);
/// solys.home()?;
/// # Ok::<(), hardware::solys::SolysError>(())
/// ```
#[derive(Debug)]
pub struct Solys2 {
    connection: Connection,
}

impl Solys2 {
    /// Open a connection and log the firmware version.
    pub fn connect(config: ConnectionConfig) -> SolysResult<Self> {
        let mut solys = Self::from_connection(Connection::open(config)?);
        let version = solys.version()?;
        info!("Connected to Solys2 firmware {version}");
        Ok(solys)
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Token that aborts the unbounded reconnect loop.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.connection.set_cancel_token(token);
    }

    pub fn close(&mut self) {
        self.connection.close();
    }

    // ==================== Raw Access ====================

    /// Send raw command text and return the decoded reply.
    ///
    /// Device errors are returned as [`DeviceReply::Failed`], not as `Err`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hardware::solys::{ConnectionConfig, Solys2};
    /// # let mut solys = Solys2::connect(ConnectionConfig::default())?;
    /// let reply = solys.send_command("LL")?;
    /// println!("{}", reply.raw());
    /// # Ok::<(), hardware::solys::SolysError>(())
    /// ```
    pub fn send_command(&mut self, raw: &str) -> SolysResult<DeviceReply> {
        let command = Command::parse(raw)?;
        self.execute(&command)
    }

    fn execute(&mut self, command: &Command) -> SolysResult<DeviceReply> {
        let reply = self.connection.exchange(command)?;
        match reply {
            DeviceReply::Failed { ref code, .. }
                if code.is_protection() && command.mnemonic() != "PW" =>
            {
                warn!(
                    "{} rejected with {code}, re-authenticating",
                    command.mnemonic()
                );
                self.authenticate()?;
                match self.connection.exchange(command)? {
                    DeviceReply::Failed { code, raw } if code.is_protection() => {
                        error!("{} still protected after re-authenticating", command.mnemonic());
                        Err(SolysError::ProtectionLoop { code, raw })
                    }
                    retried => Ok(retried),
                }
            }
            other => Ok(other),
        }
    }

    fn authenticate(&mut self) -> SolysResult<()> {
        let password = self.connection.config().password.clone();
        for command in [Command::password(&password), Command::protection(false)] {
            if let DeviceReply::Failed { code, raw } = self.connection.exchange(&command)? {
                error!("{} failed during re-authentication: {code}", command.mnemonic());
                return Err(SolysError::Protocol { code, raw });
            }
        }
        Ok(())
    }

    fn request(&mut self, command: &Command) -> SolysResult<(Payload, String)> {
        match self.execute(command)? {
            DeviceReply::Answered { payload, raw } => Ok((payload, raw)),
            DeviceReply::Failed { code, raw } => {
                error!("{} failed: {code}", command.mnemonic());
                Err(SolysError::Protocol { code, raw })
            }
        }
    }

    /// Request numeric fields, requiring at least `min` of them.
    fn values(&mut self, command: &Command, min: usize) -> SolysResult<Vec<f64>> {
        match self.request(command)? {
            (Payload::Values(values), _) if values.len() >= min => Ok(values),
            (_, raw) => Err(unexpected(command, raw)),
        }
    }

    // ==================== Motion ====================

    /// Move motor `axis` to `degrees`.
    fn set_axis(&mut self, axis: Axis, degrees: f64) -> SolysResult<()> {
        let command = Command::move_axis(axis, degrees);
        match self.execute(&command)? {
            DeviceReply::Answered { .. } => Ok(()),
            DeviceReply::Failed {
                code: ErrorCode::TravelBoundsExceeded,
                raw,
            } => {
                error!("{axis} move to {degrees} exceeds the travel bounds");
                Err(SolysError::PositionOutOfRange { axis, degrees, raw })
            }
            DeviceReply::Failed { code, raw } => {
                error!("{axis} move to {degrees} failed: {code}");
                Err(SolysError::Protocol { code, raw })
            }
        }
    }

    /// Move the azimuth motor. The angle is wrapped into `[0, 360)`.
    pub fn set_azimuth(&mut self, degrees: f64) -> SolysResult<()> {
        self.set_axis(Axis::Azimuth, degrees.rem_euclid(360.0))
    }

    /// Move the zenith motor. Bounds are enforced by the device.
    pub fn set_zenith(&mut self, degrees: f64) -> SolysResult<()> {
        self.set_axis(Axis::Zenith, degrees)
    }

    /// Move both motors, azimuth first.
    ///
    /// # Errors
    ///
    /// Returns [`SolysError::PositionOutOfRange`] if either move exceeds the
    /// travel bounds. The azimuth move is not undone if only the zenith fails.
    pub fn set_position(&mut self, azimuth: f64, zenith: f64) -> SolysResult<()> {
        debug!("Moving to az={azimuth:.4} ze={zenith:.4}");
        self.set_azimuth(azimuth)?;
        self.set_zenith(zenith)
    }

    /// Start homing. Returns once the device accepts the command; poll the
    /// position to detect completion.
    pub fn home(&mut self) -> SolysResult<()> {
        self.request(&Command::home()).map(|_| ())
    }

    /// Park facing the ground.
    pub fn point_down(&mut self) -> SolysResult<()> {
        self.set_zenith(POINT_DOWN_ZENITH)
    }

    /// Adjust the azimuth motor by up to ±[`MAX_ADJUSTMENT_STEP`] degrees.
    pub fn adjust_azimuth(&mut self, degrees: f64) -> SolysResult<()> {
        self.adjust_axis(Axis::Azimuth, degrees)
    }

    /// Adjust the zenith motor by up to ±[`MAX_ADJUSTMENT_STEP`] degrees.
    pub fn adjust_zenith(&mut self, degrees: f64) -> SolysResult<()> {
        self.adjust_axis(Axis::Zenith, degrees)
    }

    fn adjust_axis(&mut self, axis: Axis, degrees: f64) -> SolysResult<()> {
        let step = degrees.clamp(-MAX_ADJUSTMENT_STEP, MAX_ADJUSTMENT_STEP);
        if step != degrees {
            warn!("{axis} adjustment {degrees} clamped to {step}");
        }
        self.request(&Command::adjust(axis, step)).map(|_| ())
    }

    // ==================== Queries ====================

    /// Get the current position and the raw reply it was decoded from.
    pub fn get_current_position(&mut self) -> SolysResult<CurrentPosition> {
        self.position_reply(&Command::current_position())
    }

    /// Get the last commanded position.
    pub fn planned_position(&mut self) -> SolysResult<CurrentPosition> {
        self.position_reply(&Command::planned_position())
    }

    fn position_reply(&mut self, command: &Command) -> SolysResult<CurrentPosition> {
        match self.request(command)? {
            (Payload::Position { azimuth, zenith }, raw) => Ok(CurrentPosition {
                azimuth,
                zenith,
                raw,
            }),
            (_, raw) => Err(unexpected(command, raw)),
        }
    }

    /// Get the instrument mode and status flags.
    pub fn get_status(&mut self) -> SolysResult<DeviceStatus> {
        let command = Command::status();
        match self.request(&command)? {
            (Payload::Status { mode, flags }, raw) => {
                Ok(DeviceStatus::from_fields(mode, flags, raw))
            }
            (_, raw) => Err(unexpected(&command, raw)),
        }
    }

    /// Firmware version string.
    pub fn version(&mut self) -> SolysResult<String> {
        let command = Command::version();
        match self.request(&command)? {
            (Payload::Text(text), _) => Ok(text),
            (_, raw) => Err(unexpected(&command, raw)),
        }
    }

    /// Current motor adjustments `(azimuth, zenith)` in degrees.
    pub fn adjustment(&mut self) -> SolysResult<(f64, f64)> {
        let values = self.values(&Command::adjustment(), 2)?;
        Ok((values[0], values[1]))
    }

    pub fn location(&mut self) -> SolysResult<Location> {
        let values = self.values(&Command::location(), 2)?;
        Ok(Location {
            latitude: values[0],
            longitude: values[1],
            pressure: values.get(2).copied(),
        })
    }

    pub fn power_save(&mut self) -> SolysResult<bool> {
        let values = self.values(&Command::power_save_query(), 1)?;
        Ok(values[0] != 0.0)
    }

    pub fn set_power_save(&mut self, enabled: bool) -> SolysResult<()> {
        self.request(&Command::power_save(enabled)).map(|_| ())
    }

    /// Path segments queued per motor.
    pub fn queue_status(&mut self) -> SolysResult<Vec<u32>> {
        let values = self.values(&Command::queue_status(), 1)?;
        Ok(values.into_iter().map(|v| v as u32).collect())
    }

    pub fn function(&mut self) -> SolysResult<TrackerFunction> {
        let command = Command::function_query();
        let values = self.values(&command, 1)?;
        let code = values[0];
        if code.fract() != 0.0 || !(0.0..=255.0).contains(&code) {
            return Err(unexpected(&command, format!("FU {code}")));
        }
        TrackerFunction::from_code(code as u8)
            .ok_or_else(|| unexpected(&command, format!("FU {code}")))
    }

    pub fn set_function(&mut self, function: TrackerFunction) -> SolysResult<()> {
        info!("Setting tracker function to {function}");
        self.request(&Command::function(function.code())).map(|_| ())
    }

    /// Hand pointing over to the internal sun tracker.
    pub fn set_automatic(&mut self) -> SolysResult<()> {
        self.set_function(TrackerFunction::SunTracking)?;
        self.home()
    }

    /// Return to externally commanded positioning.
    pub fn set_manual(&mut self) -> SolysResult<()> {
        self.set_function(TrackerFunction::Standard)?;
        self.home()
    }

    pub fn sun_intensity(&mut self) -> SolysResult<SunIntensity> {
        let values = self.values(&Command::sun_intensity(), 5)?;
        Ok(SunIntensity {
            quadrants: [values[0], values[1], values[2], values[3]],
            total: values[4],
        })
    }

    // ==================== Clock ====================

    /// Device clock as UTC.
    pub fn device_time(&mut self) -> SolysResult<OffsetDateTime> {
        let command = Command::time();
        let values = self.values(&command, 5)?;
        parse_device_time(&values)
            .ok_or_else(|| unexpected(&command, format!("TI {values:?}")))
    }

    /// Device clock minus host clock.
    ///
    /// Logged at info when within two seconds, as a warning otherwise.
    pub fn clock_offset(&mut self) -> SolysResult<TimeDuration> {
        let device = self.device_time()?;
        let offset = device - OffsetDateTime::now_utc();
        let seconds = offset.as_seconds_f64();
        if seconds.abs() <= CLOCK_TOLERANCE_SECS {
            info!("Solys2 clock offset {seconds:.3} s");
        } else {
            warn!("Solys2 clock is off by {seconds:.3} s");
        }
        Ok(offset)
    }
}

fn unexpected(command: &Command, raw: String) -> SolysError {
    SolysError::UnexpectedReply {
        command: command.mnemonic().to_string(),
        raw,
    }
}

/// Build a timestamp from `TI` fields: year, day of year, hour, minute, seconds.
fn parse_device_time(values: &[f64]) -> Option<OffsetDateTime> {
    let [year, day, hour, minute, second, ..] = *values else {
        return None;
    };
    if [year, day, hour, minute].iter().any(|v| v.fract() != 0.0) || second < 0.0 {
        return None;
    }
    let date = Date::from_ordinal_date(year as i32, day as u16).ok()?;
    let nanos = (second.fract() * 1e9).round() as u32;
    let time = Time::from_hms_nano(hour as u8, minute as u8, second.trunc() as u8, nanos.min(999_999_999)).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

impl Positioner for Solys2 {
    fn set_position(&mut self, azimuth: f64, zenith: f64) -> SolysResult<()> {
        Solys2::set_position(self, azimuth, zenith)
    }

    fn current_position(&mut self) -> SolysResult<(f64, f64)> {
        let position = self.get_current_position()?;
        Ok((position.azimuth, position.zenith))
    }

    fn location(&mut self) -> SolysResult<(f64, f64)> {
        let location = Solys2::location(self)?;
        Ok((location.latitude, location.longitude))
    }

    fn adjustment(&mut self) -> SolysResult<(f64, f64)> {
        Solys2::adjustment(self)
    }

    fn set_power_save(&mut self, enabled: bool) -> SolysResult<()> {
        Solys2::set_power_save(self, enabled)
    }

    fn sun_intensity(&mut self) -> SolysResult<Option<SunIntensity>> {
        Solys2::sun_intensity(self).map(Some)
    }
}
