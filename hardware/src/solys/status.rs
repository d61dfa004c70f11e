//! Instrument status decoding.

use bitflags::bitflags;
use strum::{Display, EnumIter};

/// Tracker operating function (`FU` command, first field of `IS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum TrackerFunction {
    /// Motors idle, no commands executed
    #[strum(to_string = "no function")]
    NoFunction,
    /// Positioning on `PO` commands
    #[strum(to_string = "standard")]
    Standard,
    /// Standard positioning with reversed zenith convention
    #[strum(to_string = "standard reverse")]
    StandardReverse,
    /// Autonomous sun tracking from the internal almanac
    #[strum(to_string = "sun tracking")]
    SunTracking,
    /// Sun tracking corrected by the sun sensor
    #[strum(to_string = "active tracking")]
    ActiveTracking,
}

impl TrackerFunction {
    pub fn code(self) -> u8 {
        match self {
            Self::NoFunction => 0,
            Self::Standard => 1,
            Self::StandardReverse => 2,
            Self::SunTracking => 4,
            Self::ActiveTracking => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NoFunction),
            1 => Some(Self::Standard),
            2 => Some(Self::StandardReverse),
            4 => Some(Self::SunTracking),
            6 => Some(Self::ActiveTracking),
            _ => None,
        }
    }

    /// Whether the device follows the sun by itself in this function.
    pub fn is_autonomous(self) -> bool {
        matches!(self, Self::SunTracking | Self::ActiveTracking)
    }
}

bitflags! {
    /// Status bitmask reported as the hexadecimal second field of `IS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        const AZIMUTH_MOVING = 1 << 0;
        const ZENITH_MOVING = 1 << 1;
        const HOMING = 1 << 2;
        const HOMED = 1 << 3;
        const SUN_SENSOR_LOCKED = 1 << 4;
        const POWER_SAVE = 1 << 5;
        const PROTECTION_LIFTED = 1 << 6;
        const CLOCK_SET = 1 << 7;
        const LOCATION_SET = 1 << 8;
        const AZIMUTH_LIMIT = 1 << 9;
        const ZENITH_LIMIT = 1 << 10;
        const HARDWARE_FAULT = 1 << 11;
    }
}

/// Decoded `IS` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    /// Raw mode field
    pub mode: u8,
    /// Mode as a tracker function, `None` for codes outside the known set
    pub function: Option<TrackerFunction>,
    /// Known flags that are set; bits outside the known set are dropped
    pub flags: StatusFlags,
    /// Names of flags that are set
    pub activated: Vec<&'static str>,
    /// Names of flags that are clear
    pub deactivated: Vec<&'static str>,
    /// Reply line as received
    pub raw: String,
}

impl DeviceStatus {
    pub fn from_fields(mode: u8, bits: u16, raw: impl Into<String>) -> Self {
        let flags = StatusFlags::from_bits_truncate(bits);
        let activated = flags.iter_names().map(|(name, _)| name).collect();
        let deactivated = (StatusFlags::all() - flags)
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        Self {
            mode,
            function: TrackerFunction::from_code(mode),
            flags,
            activated,
            deactivated,
            raw: raw.into(),
        }
    }

    /// Whether either motor is still moving.
    pub fn is_moving(&self) -> bool {
        self.flags
            .intersects(StatusFlags::AZIMUTH_MOVING | StatusFlags::ZENITH_MOVING)
    }

    pub fn has_fault(&self) -> bool {
        self.flags.contains(StatusFlags::HARDWARE_FAULT)
    }
}
