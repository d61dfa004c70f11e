//! JSON configuration for the automation tools.
//!
//! Every field has a default, so `{}` is a valid file:
//!
//! ```json
//! {
//!   "device": { "host": "192.168.1.50", "password": "solys" },
//!   "observer": { "latitude": 41.6636, "longitude": -4.7058, "elevation": 705 },
//!   "tracking": { "body": "moon", "interval": 20, "offset": { "azimuth": 0.1, "zenith": 0 } },
//!   "calibration": { "pattern": "mesh", "countdown": 20, "azimuth": { "min": -1, "max": 1, "step": 0.25 } }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use ephemeris::{Body, Observer, ProviderKind};
use hardware::solys::ConnectionConfig;
use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationParameters, PatternKind};
use crate::error::{AutomationError, AutomationResult};
use crate::target::PointingOffset;
use crate::tracker::TrackingConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub device: ConnectionConfig,
    /// Site override; the device's stored location is used when absent.
    pub observer: Option<Observer>,
    pub tracking: TrackingSettings,
    pub calibration: CalibrationSettings,
}

impl AutomationConfig {
    pub fn load_from_file(path: &Path) -> AutomationResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AutomationError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| AutomationError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save_to_file(&self, path: &Path) -> AutomationResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AutomationError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| AutomationError::Config(format!("{}: {e}", path.display())))
    }
}

/// Tracking section; durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub body: Body,
    /// Defaults to the safe provider for `body`.
    pub provider: Option<ProviderKind>,
    pub interval: f64,
    pub offset: Option<PointingOffset>,
    pub movement_delay: f64,
    pub instrument_delay: f64,
    pub wait_for_position: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            body: Body::Sun,
            provider: None,
            interval: 20.0,
            offset: None,
            movement_delay: 5.0,
            instrument_delay: 0.0,
            wait_for_position: false,
        }
    }
}

impl TrackingSettings {
    pub fn provider(&self) -> AutomationResult<ProviderKind> {
        provider_for(self.body, self.provider)
    }

    pub fn to_tracking_config(&self) -> AutomationResult<TrackingConfig> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(AutomationError::Config(format!(
                "tracking interval must be positive, got {}",
                self.interval
            )));
        }
        Ok(TrackingConfig {
            body: self.body,
            interval: seconds("interval", self.interval)?,
            offset: self.offset,
            movement_delay: seconds("movement_delay", self.movement_delay)?,
            instrument_delay: seconds("instrument_delay", self.instrument_delay)?,
            wait_for_position: self.wait_for_position,
        })
    }
}

/// Calibration section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub body: Body,
    pub pattern: PatternKind,
    pub provider: Option<ProviderKind>,
    #[serde(flatten)]
    pub parameters: CalibrationParameters,
}

impl CalibrationSettings {
    pub fn provider(&self) -> AutomationResult<ProviderKind> {
        provider_for(self.body, self.provider)
    }
}

fn provider_for(body: Body, provider: Option<ProviderKind>) -> AutomationResult<ProviderKind> {
    match provider {
        None => Ok(ProviderKind::default_for(body)),
        Some(kind) if kind.body() == body => Ok(kind),
        Some(kind) => Err(AutomationError::Config(format!(
            "provider {kind} does not compute the {body}"
        ))),
    }
}

fn seconds(name: &str, value: f64) -> AutomationResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        AutomationError::Config(format!(
            "{name} must be a non-negative number of seconds, got {value}"
        ))
    })
}
