//! Positioner interface for automation workflows.

use std::sync::{Arc, Mutex};

use crate::solys::{SolysResult, SunIntensity};

/// Interface for a two-axis pointing device.
///
/// Abstracts the tracker hardware so tracking and calibration loops can be
/// exercised without a device on the network.
pub trait Positioner {
    /// Command both axes.
    ///
    /// # Arguments
    /// * `azimuth` - Azimuth in degrees, clockwise from north
    /// * `zenith` - Zenith angle in degrees
    fn set_position(&mut self, azimuth: f64, zenith: f64) -> SolysResult<()>;

    /// Get the position the device currently reports as `(azimuth, zenith)`.
    fn current_position(&mut self) -> SolysResult<(f64, f64)>;

    /// Get the configured site location as `(latitude, longitude)` in degrees.
    fn location(&mut self) -> SolysResult<(f64, f64)>;

    /// Get the per-motor mechanical adjustments `(azimuth, zenith)` in degrees.
    fn adjustment(&mut self) -> SolysResult<(f64, f64)> {
        Ok((0.0, 0.0))
    }

    /// Enable or disable the device's power save mode. Automation turns it
    /// off before driving the axes.
    fn set_power_save(&mut self, _enabled: bool) -> SolysResult<()> {
        Ok(())
    }

    /// Read the four-quadrant sun sensor, if the device has one.
    fn sun_intensity(&mut self) -> SolysResult<Option<SunIntensity>> {
        Ok(None)
    }
}

/// Positioner handle shared between the owner and a running worker.
///
/// Only one worker may drive a device at a time; the mutex serialises
/// individual commands but does not arbitrate between workers.
pub type SharedPositioner = Arc<Mutex<dyn Positioner + Send>>;
