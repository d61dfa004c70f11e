//! Lunar position algorithms.
//!
//! Both return topocentric positions: the geocentric altitude is lowered by
//! the horizontal parallax (up to about one degree near the horizon).

use time::OffsetDateTime;

use super::{
    checked, cosd, ecliptic_to_equatorial, equatorial_to_horizontal, julian_centuries,
    julian_day, normalize_degrees, sind,
};
use crate::{Body, EphemerisError, HorizontalPosition, Observer, PositionProvider};

/// Equatorial radius of the earth in km.
const EARTH_RADIUS_KM: f64 = 6378.14;

/// Periodic terms for longitude (1e-6 deg) and distance (1e-3 km):
/// multiples of D, M, M', F.
const LONGITUDE_DISTANCE_TERMS: [(i8, i8, i8, i8, f64, f64); 32] = [
    (0, 0, 1, 0, 6_288_774.0, -20_905_355.0),
    (2, 0, -1, 0, 1_274_027.0, -3_699_111.0),
    (2, 0, 0, 0, 658_314.0, -2_955_968.0),
    (0, 0, 2, 0, 213_618.0, -569_925.0),
    (0, 1, 0, 0, -185_116.0, 48_888.0),
    (0, 0, 0, 2, -114_332.0, -3_149.0),
    (2, 0, -2, 0, 58_793.0, 246_158.0),
    (2, -1, -1, 0, 57_066.0, -152_138.0),
    (2, 0, 1, 0, 53_322.0, -170_733.0),
    (2, -1, 0, 0, 45_758.0, -204_586.0),
    (0, 1, -1, 0, -40_923.0, -129_620.0),
    (1, 0, 0, 0, -34_720.0, 108_743.0),
    (0, 1, 1, 0, -30_383.0, 104_755.0),
    (2, 0, 0, -2, 15_327.0, 10_321.0),
    (0, 0, 1, 2, -12_528.0, 0.0),
    (0, 0, 1, -2, 10_980.0, 79_661.0),
    (4, 0, -1, 0, 10_675.0, -34_782.0),
    (0, 0, 3, 0, 10_034.0, -23_210.0),
    (4, 0, -2, 0, 8_548.0, -21_636.0),
    (2, 1, -1, 0, -7_888.0, 24_208.0),
    (2, 1, 0, 0, -6_766.0, 30_824.0),
    (1, 0, -1, 0, -5_163.0, -8_379.0),
    (1, 1, 0, 0, 4_987.0, -16_675.0),
    (2, -1, 1, 0, 4_036.0, -12_831.0),
    (2, 0, 2, 0, 3_994.0, -10_445.0),
    (4, 0, 0, 0, 3_861.0, -11_650.0),
    (2, 0, -3, 0, 3_665.0, 14_403.0),
    (0, 1, -2, 0, -2_689.0, -7_003.0),
    (2, 0, -1, 2, -2_602.0, 0.0),
    (2, -1, -2, 0, 2_390.0, 10_056.0),
    (1, 0, 1, 0, -2_348.0, 6_322.0),
    (2, -2, 0, 0, 2_236.0, -9_884.0),
];

/// Periodic terms for latitude (1e-6 deg).
const LATITUDE_TERMS: [(i8, i8, i8, i8, f64); 20] = [
    (0, 0, 0, 1, 5_128_122.0),
    (0, 0, 1, 1, 280_602.0),
    (0, 0, 1, -1, 277_693.0),
    (2, 0, 0, -1, 173_237.0),
    (2, 0, -1, 1, 55_413.0),
    (2, 0, -1, -1, 46_271.0),
    (2, 0, 0, 1, 32_573.0),
    (0, 0, 2, 1, 17_198.0),
    (2, 0, 1, -1, 9_266.0),
    (0, 0, 2, -1, 8_822.0),
    (2, -1, 0, -1, 8_216.0),
    (2, 0, -2, -1, 4_324.0),
    (2, 0, 1, 1, 4_200.0),
    (2, 1, 0, -1, -3_359.0),
    (2, -1, -1, 1, 2_463.0),
    (2, -1, 0, 1, 2_211.0),
    (2, -1, -1, -1, 2_065.0),
    (0, 1, -1, -1, -1_870.0),
    (4, 0, -1, -1, 1_828.0),
    (0, 1, 0, 1, -1_794.0),
];

/// Truncated ELP-2000/82 series (Meeus, chapter 47).
///
/// Uses the dominant periodic terms; around 0.01° in longitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoonMeeus;

impl PositionProvider for MoonMeeus {
    fn body(&self) -> Body {
        Body::Moon
    }

    fn name(&self) -> &'static str {
        "moon-meeus"
    }

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        observer.validate()?;
        let jd = julian_day(at);
        let t = julian_centuries(jd);
        let (t2, t3, t4) = (t * t, t * t * t, t * t * t * t);

        let mean_longitude =
            218.316_447_7 + 481_267.881_234_21 * t - 0.001_578_6 * t2 + t3 / 538_841.0
                - t4 / 65_194_000.0;
        let elongation = 297.850_192_1 + 445_267.111_403_4 * t - 0.001_881_9 * t2
            + t3 / 545_868.0
            - t4 / 113_065_000.0;
        let sun_anomaly = 357.529_109_2 + 35_999.050_290_9 * t - 0.000_153_6 * t2 + t3 / 24_490_000.0;
        let moon_anomaly = 134.963_396_4 + 477_198.867_505_5 * t + 0.008_741_4 * t2 + t3 / 69_699.0
            - t4 / 14_712_000.0;
        let latitude_argument = 93.272_095 + 483_202.017_523_3 * t - 0.003_653_9 * t2
            - t3 / 3_526_000.0
            + t4 / 863_310_000.0;

        let a1 = 119.75 + 131.849 * t;
        let a2 = 53.09 + 479_264.290 * t;
        let a3 = 313.45 + 481_266.484 * t;
        let eccentricity = 1.0 - 0.002_516 * t - 0.000_007_4 * t2;

        let argument = |d: i8, m: i8, mp: i8, f: i8| {
            f64::from(d) * elongation
                + f64::from(m) * sun_anomaly
                + f64::from(mp) * moon_anomaly
                + f64::from(f) * latitude_argument
        };
        let eccentricity_factor = |m: i8| eccentricity.powi(i32::from(m.abs()));

        let (mut sum_l, mut sum_r) = (0.0, 0.0);
        for &(d, m, mp, f, l, r) in &LONGITUDE_DISTANCE_TERMS {
            let arg = argument(d, m, mp, f);
            let e = eccentricity_factor(m);
            sum_l += l * e * sind(arg);
            sum_r += r * e * cosd(arg);
        }

        let mut sum_b = 0.0;
        for &(d, m, mp, f, b) in &LATITUDE_TERMS {
            sum_b += b * eccentricity_factor(m) * sind(argument(d, m, mp, f));
        }

        sum_l += 3958.0 * sind(a1) + 1962.0 * sind(mean_longitude - latitude_argument)
            + 318.0 * sind(a2);
        sum_b += -2235.0 * sind(mean_longitude)
            + 382.0 * sind(a3)
            + 175.0 * sind(a1 - latitude_argument)
            + 175.0 * sind(a1 + latitude_argument)
            + 127.0 * sind(mean_longitude - moon_anomaly)
            - 115.0 * sind(mean_longitude + moon_anomaly);

        let longitude = normalize_degrees(mean_longitude + sum_l / 1e6);
        let latitude = sum_b / 1e6;
        let distance_km = 385_000.56 + sum_r / 1000.0;
        let obliquity = 23.439_291_1 - 0.013_004_2 * t;

        let parallax = (EARTH_RADIUS_KM / distance_km).asin().to_degrees();
        let (right_ascension, declination) = ecliptic_to_equatorial(longitude, latitude, obliquity);
        let geocentric = equatorial_to_horizontal(right_ascension, declination, jd, observer);

        checked(Body::Moon, apply_parallax(geocentric, parallax))
    }
}

/// Astronomical Almanac low-precision lunar coordinates.
///
/// About 0.3° in longitude and 0.2° in latitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoonAlmanac;

impl PositionProvider for MoonAlmanac {
    fn body(&self) -> Body {
        Body::Moon
    }

    fn name(&self) -> &'static str {
        "moon-almanac"
    }

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        observer.validate()?;
        let jd = julian_day(at);
        let t = julian_centuries(jd);

        let longitude = 218.32 + 481_267.881 * t + 6.29 * sind(135.0 + 477_198.87 * t)
            - 1.27 * sind(259.3 - 413_335.36 * t)
            + 0.66 * sind(235.7 + 890_534.22 * t)
            + 0.21 * sind(269.9 + 954_397.74 * t)
            - 0.19 * sind(357.5 + 35_999.05 * t)
            - 0.11 * sind(186.5 + 966_404.03 * t);
        let latitude = 5.13 * sind(93.3 + 483_202.02 * t) + 0.28 * sind(228.2 + 960_400.89 * t)
            - 0.28 * sind(318.3 + 6_003.15 * t)
            - 0.17 * sind(217.6 - 407_332.21 * t);
        let parallax = 0.9508
            + 0.0518 * cosd(135.0 + 477_198.87 * t)
            + 0.0095 * cosd(259.3 - 413_335.36 * t)
            + 0.0078 * cosd(235.7 + 890_534.22 * t)
            + 0.0028 * cosd(269.9 + 954_397.74 * t);
        let obliquity = 23.439 - 0.013 * t;

        let (right_ascension, declination) =
            ecliptic_to_equatorial(normalize_degrees(longitude), latitude, obliquity);
        let geocentric = equatorial_to_horizontal(right_ascension, declination, jd, observer);

        checked(Body::Moon, apply_parallax(geocentric, parallax))
    }
}

/// Lower the altitude by the parallax in altitude, `p * cos(alt)`.
fn apply_parallax(geocentric: HorizontalPosition, parallax: f64) -> HorizontalPosition {
    let altitude = 90.0 - geocentric.zenith;
    HorizontalPosition {
        azimuth: geocentric.azimuth,
        zenith: geocentric.zenith + parallax * cosd(altitude),
    }
}
