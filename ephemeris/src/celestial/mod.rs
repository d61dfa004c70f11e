//! Shared time and coordinate transforms.

use nalgebra::{Rotation3, Vector3};
use time::OffsetDateTime;

use crate::{Body, EphemerisError, HorizontalPosition, Observer};

pub mod moon;
pub mod sun;

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian date of J2000.0.
pub const J2000: f64 = 2_451_545.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Julian date (UTC) of `at`.
pub fn julian_day(at: OffsetDateTime) -> f64 {
    let seconds = at.unix_timestamp_nanos() as f64 / 1e9;
    seconds / SECONDS_PER_DAY + UNIX_EPOCH_JD
}

/// Julian centuries since J2000.0.
pub fn julian_centuries(jd: f64) -> f64 {
    (jd - J2000) / 36_525.0
}

/// Greenwich mean sidereal time in degrees.
pub fn greenwich_sidereal_time(jd: f64) -> f64 {
    let t = julian_centuries(jd);
    let gmst = 280.460_618_37 + 360.985_647_366_29 * (jd - J2000) + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    normalize_degrees(gmst)
}

/// Wrap an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Right ascension and declination (degrees) of an ecliptic direction.
pub fn ecliptic_to_equatorial(longitude: f64, latitude: f64, obliquity: f64) -> (f64, f64) {
    let (lon, lat) = (longitude.to_radians(), latitude.to_radians());
    let ecliptic = Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin());
    let rotation = Rotation3::from_axis_angle(&Vector3::x_axis(), obliquity.to_radians());
    let equatorial = rotation * ecliptic;

    let right_ascension = normalize_degrees(equatorial.y.atan2(equatorial.x).to_degrees());
    let declination = equatorial.z.clamp(-1.0, 1.0).asin().to_degrees();
    (right_ascension, declination)
}

/// Horizontal position from local hour angle and declination (degrees).
pub fn hour_angle_to_horizontal(
    hour_angle: f64,
    declination: f64,
    latitude: f64,
) -> HorizontalPosition {
    let (h, dec, lat) = (
        hour_angle.to_radians(),
        declination.to_radians(),
        latitude.to_radians(),
    );

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * h.cos();
    let altitude = sin_alt.clamp(-1.0, 1.0).asin();
    let azimuth = (-dec.cos() * h.sin()).atan2(dec.sin() * lat.cos() - dec.cos() * lat.sin() * h.cos());

    HorizontalPosition {
        azimuth: normalize_degrees(azimuth.to_degrees()),
        zenith: 90.0 - altitude.to_degrees(),
    }
}

/// Horizontal position of an equatorial direction for `observer` at `jd`.
pub fn equatorial_to_horizontal(
    right_ascension: f64,
    declination: f64,
    jd: f64,
    observer: &Observer,
) -> HorizontalPosition {
    let local_sidereal = greenwich_sidereal_time(jd) + observer.longitude;
    hour_angle_to_horizontal(local_sidereal - right_ascension, declination, observer.latitude)
}

/// Reject results that are not finite.
pub(crate) fn checked(
    body: Body,
    position: HorizontalPosition,
) -> Result<HorizontalPosition, EphemerisError> {
    if position.azimuth.is_finite() && position.zenith.is_finite() {
        Ok(position)
    } else {
        Err(EphemerisError::PositionComputation {
            body,
            reason: format!("non-finite result {position:?}"),
        })
    }
}

/// Sine of an angle in degrees.
pub(crate) fn sind(degrees: f64) -> f64 {
    degrees.to_radians().sin()
}

/// Cosine of an angle in degrees.
pub(crate) fn cosd(degrees: f64) -> f64 {
    degrees.to_radians().cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use time::macros::datetime;

    #[test]
    fn test_julian_day_epochs() {
        assert_abs_diff_eq!(julian_day(datetime!(2000-01-01 12:00 UTC)), J2000, epsilon = 1e-9);
        assert_abs_diff_eq!(
            julian_day(datetime!(1970-01-01 00:00 UTC)),
            UNIX_EPOCH_JD,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_sidereal_time_at_j2000() {
        assert_abs_diff_eq!(greenwich_sidereal_time(J2000), 280.46061837, epsilon = 1e-6);
    }

    #[test]
    fn test_equinox_point_maps_to_origin() {
        let (ra, dec) = ecliptic_to_equatorial(0.0, 0.0, 23.44);
        assert_abs_diff_eq!(ra, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(dec, 0.0, epsilon = 1e-9);

        // Summer solstice point sits at +obliquity declination
        let (ra, dec) = ecliptic_to_equatorial(90.0, 0.0, 23.44);
        assert_abs_diff_eq!(ra, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(dec, 23.44, epsilon = 1e-9);
    }

    #[test]
    fn test_horizontal_cardinal_directions() {
        // On the meridian, south of an observer at 40N
        let p = hour_angle_to_horizontal(0.0, 0.0, 40.0);
        assert_abs_diff_eq!(p.azimuth, 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.zenith, 40.0, epsilon = 1e-9);

        // Rising due east on the equator at the equinox
        let p = hour_angle_to_horizontal(-90.0, 0.0, 0.0);
        assert_abs_diff_eq!(p.azimuth, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.zenith, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_abs_diff_eq!(normalize_degrees(-90.0), 270.0);
        assert_abs_diff_eq!(normalize_degrees(720.5), 0.5, epsilon = 1e-12);
        assert!(normalize_degrees(-1e-20) < 360.0);
    }
}
