//! Pointing helpers shared by the tracker and the calibration sweep.

use std::sync::{MutexGuard, PoisonError};
use std::time::Duration;

use ephemeris::{HorizontalPosition, Observer};
use hardware::{Positioner, SharedPositioner};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AutomationResult;
use crate::worker::TickContext;

/// Sum of absolute axis errors (degrees) at which a move counts as complete.
pub const POSITION_TOLERANCE: f64 = 0.01;

/// Zenith of the horizon; the tracker never commands below it.
pub const HORIZON_ZENITH: f64 = 90.0;

/// Poll period while waiting for a move to complete.
const POSITION_POLL: Duration = Duration::from_secs(1);

/// Fixed offset added to the computed body position, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointingOffset {
    pub azimuth: f64,
    pub zenith: f64,
}

impl PointingOffset {
    pub fn new(azimuth: f64, zenith: f64) -> Self {
        Self { azimuth, zenith }
    }

    /// `(azimuth, zenith)` of `position` shifted by this offset.
    pub fn apply(&self, position: &HorizontalPosition) -> (f64, f64) {
        (
            position.azimuth + self.azimuth,
            position.zenith + self.zenith,
        )
    }
}

pub(crate) fn lock(positioner: &SharedPositioner) -> MutexGuard<'_, dyn Positioner + Send + 'static> {
    positioner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Power save can leave the motors idle, so it is turned off before a run.
pub(crate) fn disable_power_save(positioner: &SharedPositioner) -> AutomationResult<()> {
    lock(positioner).set_power_save(false)?;
    debug!("Power save disabled");
    Ok(())
}

/// Use the configured observer, or the site stored on the device.
pub(crate) fn resolve_observer(
    configured: Option<Observer>,
    positioner: &SharedPositioner,
) -> AutomationResult<Observer> {
    if let Some(observer) = configured {
        observer.validate()?;
        return Ok(observer);
    }
    let (latitude, longitude) = lock(positioner).location()?;
    let observer = Observer::new(latitude, longitude, 0.0);
    observer.validate()?;
    info!("Using device location lat={latitude:.5} lon={longitude:.5}");
    Ok(observer)
}

/// Smallest absolute difference between two azimuths.
pub fn azimuth_difference(a: f64, b: f64) -> f64 {
    ((a - b + 180.0).rem_euclid(360.0) - 180.0).abs()
}

/// Block until the device reports `(azimuth, zenith)`, polling once a second.
///
/// The reported position includes the motor adjustments, which are removed
/// before comparing. Returns `false` if the worker was stopped first.
pub fn wait_position_reached(
    ctx: &TickContext,
    positioner: &SharedPositioner,
    azimuth: f64,
    zenith: f64,
) -> AutomationResult<bool> {
    loop {
        let (current, adjustment) = {
            let mut device = lock(positioner);
            (device.current_position()?, device.adjustment()?)
        };
        let error = azimuth_difference(current.0 - adjustment.0, azimuth)
            + (current.1 - adjustment.1 - zenith).abs();
        if error <= POSITION_TOLERANCE {
            return Ok(true);
        }
        debug!("Waiting for position, {error:.4} deg to go");
        if ctx.sleep(POSITION_POLL) {
            return Ok(false);
        }
    }
}
