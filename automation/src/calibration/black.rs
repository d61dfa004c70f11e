//! Dark reference measurement: point well away from the body and read the
//! sun sensor.

use ephemeris::{HorizontalPosition, Observer, PositionProvider};
use hardware::solys::SunIntensity;
use hardware::SharedPositioner;
use time::OffsetDateTime;
use tracing::info;

use crate::error::AutomationResult;
use crate::target::{self, PointingOffset};

/// Zenith angle the dark measurement looks at.
const BLACK_ZENITH: f64 = 45.0;

/// Outcome of a dark measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct BlackMeasurement {
    pub body: HorizontalPosition,
    /// Commanded `(azimuth, zenith)`.
    pub target: (f64, f64),
    /// Position reported by the device after the move.
    pub reported: (f64, f64),
    pub intensity: Option<SunIntensity>,
}

/// Offset that turns the device away from `body`.
///
/// Azimuth is shifted by half a turn in whichever direction keeps it inside
/// 0..360; zenith goes to 45 degrees.
pub fn black_offset(body: &HorizontalPosition) -> PointingOffset {
    let azimuth = if body.azimuth > 180.0 { -180.0 } else { 180.0 };
    PointingOffset::new(azimuth, BLACK_ZENITH - body.zenith)
}

/// Move away from the body at `at` and record position and intensities.
pub fn measure_black(
    positioner: &SharedPositioner,
    provider: &dyn PositionProvider,
    observer: Option<Observer>,
    at: OffsetDateTime,
) -> AutomationResult<BlackMeasurement> {
    let observer = target::resolve_observer(observer, positioner)?;
    target::disable_power_save(positioner)?;
    let body = provider.position(at, &observer)?;
    let (azimuth, zenith) = black_offset(&body).apply(&body);

    let mut device = target::lock(positioner);
    device.set_position(azimuth, zenith)?;
    let reported = device.current_position()?;
    let intensity = device.sun_intensity()?;
    drop(device);

    info!(
        "Black measurement: {} at az={:.4} ze={:.4}, pointing az={azimuth:.4} ze={zenith:.4}",
        provider.body(),
        body.azimuth,
        body.zenith
    );
    info!("Reported position az={:.4} ze={:.4}", reported.0, reported.1);
    match &intensity {
        Some(si) => info!(
            "Sun intensity quadrants={:?} total={:.1}",
            si.quadrants, si.total
        ),
        None => info!("No sun sensor reading available"),
    }

    Ok(BlackMeasurement {
        body,
        target: (azimuth, zenith),
        reported,
        intensity,
    })
}
