//! Solar position algorithms.

use std::f64::consts::PI;

use time::{OffsetDateTime, UtcOffset};

use super::{
    checked, cosd, ecliptic_to_equatorial, equatorial_to_horizontal, hour_angle_to_horizontal,
    julian_day, sind, J2000,
};
use crate::{Body, EphemerisError, HorizontalPosition, Observer, PositionProvider};

/// NOAA general solar position (fractional-year series).
///
/// Accurate to a few arcminutes between 1950 and 2050; no refraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SunNoaa;

impl PositionProvider for SunNoaa {
    fn body(&self) -> Body {
        Body::Sun
    }

    fn name(&self) -> &'static str {
        "sun-noaa"
    }

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        observer.validate()?;
        let at = at.to_offset(UtcOffset::UTC);

        let hour = f64::from(at.hour())
            + f64::from(at.minute()) / 60.0
            + (f64::from(at.second()) + f64::from(at.nanosecond()) / 1e9) / 3600.0;
        let days = f64::from(time::util::days_in_year(at.year()));
        let gamma = 2.0 * PI / days * (f64::from(at.ordinal()) - 1.0 + (hour - 12.0) / 24.0);

        // Equation of time in minutes
        let eqtime = 229.18
            * (0.000075 + 0.001868 * gamma.cos()
                - 0.032077 * gamma.sin()
                - 0.014615 * (2.0 * gamma).cos()
                - 0.040849 * (2.0 * gamma).sin());

        let declination = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
            - 0.006758 * (2.0 * gamma).cos()
            + 0.000907 * (2.0 * gamma).sin()
            - 0.002697 * (3.0 * gamma).cos()
            + 0.00148 * (3.0 * gamma).sin();

        let true_solar_minutes = hour * 60.0 + eqtime + 4.0 * observer.longitude;
        let hour_angle = true_solar_minutes / 4.0 - 180.0;

        checked(
            Body::Sun,
            hour_angle_to_horizontal(hour_angle, declination.to_degrees(), observer.latitude),
        )
    }
}

/// Astronomical Almanac low-precision solar coordinates.
///
/// About 0.01° between 1950 and 2050.
#[derive(Debug, Clone, Copy, Default)]
pub struct SunAlmanac;

impl PositionProvider for SunAlmanac {
    fn body(&self) -> Body {
        Body::Sun
    }

    fn name(&self) -> &'static str {
        "sun-almanac"
    }

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        observer.validate()?;
        let jd = julian_day(at);
        let n = jd - J2000;

        let mean_longitude = 280.460 + 0.985_647_4 * n;
        let mean_anomaly = 357.528 + 0.985_600_3 * n;
        let ecliptic_longitude =
            mean_longitude + 1.915 * sind(mean_anomaly) + 0.020 * sind(2.0 * mean_anomaly);
        let obliquity = 23.439 - 0.000_000_4 * n;

        let (right_ascension, declination) =
            ecliptic_to_equatorial(ecliptic_longitude, 0.0, obliquity);

        // Earth-sun distance in AU, only used as a sanity check
        let distance = 1.00014 - 0.01671 * cosd(mean_anomaly) - 0.00014 * cosd(2.0 * mean_anomaly);
        if !(0.98..=1.02).contains(&distance) {
            return Err(EphemerisError::PositionComputation {
                body: Body::Sun,
                reason: format!("implausible distance {distance} AU at JD {jd}"),
            });
        }

        checked(
            Body::Sun,
            equatorial_to_horizontal(right_ascension, declination, jd, observer),
        )
    }
}
