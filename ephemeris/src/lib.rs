//! Apparent positions of the sun and moon for a ground observer.
//!
//! Every algorithm implements [`PositionProvider`]: given a UTC instant and an
//! [`Observer`], return a [`HorizontalPosition`] (azimuth clockwise from
//! north, zenith angle from the local vertical, both in degrees).
//!
//! Two independent algorithms exist per body. [`SafeProvider`] composes them so
//! a failure of the preferred one falls back to the other; [`ProviderKind`]
//! is the closed set of selectable providers.
//!
//! ```
//! use ephemeris::{Observer, ProviderKind};
//! use time::OffsetDateTime;
//!
//! let provider = ProviderKind::SunSafe.build();
//! let site = Observer::new(41.6636, -4.7058, 705.0);
//! let position = provider.position(OffsetDateTime::now_utc(), &site).unwrap();
//! assert!((0.0..360.0).contains(&position.azimuth));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub mod celestial;
mod provider;

pub use celestial::moon::{MoonAlmanac, MoonMeeus};
pub use celestial::sun::{SunAlmanac, SunNoaa};
pub use provider::{ProviderKind, SafeProvider};

/// Tracked celestial body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    #[default]
    Sun,
    Moon,
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Sun => write!(f, "sun"),
            Body::Moon => write!(f, "moon"),
        }
    }
}

impl FromStr for Body {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sun" => Ok(Body::Sun),
            "moon" => Ok(Body::Moon),
            _ => Err(format!("Unknown body '{s}', expected sun or moon")),
        }
    }
}

/// Geodetic observer location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Observer {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    /// Metres above sea level
    #[serde(default)]
    pub elevation: f64,
}

impl Observer {
    pub fn new(latitude: f64, longitude: f64, elevation: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
        }
    }

    /// Check the coordinates are finite and in range.
    pub fn validate(&self) -> Result<(), EphemerisError> {
        if !self.latitude.is_finite() || self.latitude.abs() > 90.0 {
            return Err(EphemerisError::InvalidObserver(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || self.longitude.abs() > 360.0 {
            return Err(EphemerisError::InvalidObserver(format!(
                "longitude {} outside [-360, 360]",
                self.longitude
            )));
        }
        if !self.elevation.is_finite() {
            return Err(EphemerisError::InvalidObserver(format!(
                "elevation {} is not finite",
                self.elevation
            )));
        }
        Ok(())
    }
}

/// Local horizontal coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalPosition {
    /// Clockwise from north, in `[0, 360)`
    pub azimuth: f64,
    /// 0 at the local vertical, 90 on the horizon
    pub zenith: f64,
}

impl HorizontalPosition {
    /// Angular separation to `other` in degrees.
    pub fn separation(&self, other: &HorizontalPosition) -> f64 {
        let (alt1, alt2) = (
            (90.0 - self.zenith).to_radians(),
            (90.0 - other.zenith).to_radians(),
        );
        let daz = (self.azimuth - other.azimuth).to_radians();
        let cos_sep = alt1.sin() * alt2.sin() + alt1.cos() * alt2.cos() * daz.cos();
        cos_sep.clamp(-1.0, 1.0).acos().to_degrees()
    }
}

/// Errors from position computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EphemerisError {
    #[error("Invalid observer: {0}")]
    InvalidObserver(String),

    /// The algorithm could not produce a result.
    #[error("Position computation failed for the {body}: {reason}")]
    PositionComputation { body: Body, reason: String },
}

/// Computes where a body appears for an observer at an instant.
pub trait PositionProvider: Send + Sync {
    fn body(&self) -> Body;

    /// Short algorithm name for logs.
    fn name(&self) -> &'static str;

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError>;
}

impl<P: PositionProvider + ?Sized> PositionProvider for Box<P> {
    fn body(&self) -> Body {
        (**self).body()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        (**self).position(at, observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_body_parse() {
        assert_eq!("Sun".parse::<Body>().unwrap(), Body::Sun);
        assert_eq!("moon".parse::<Body>().unwrap(), Body::Moon);
        assert!("mars".parse::<Body>().is_err());
    }

    #[test]
    fn test_observer_validation() {
        assert!(Observer::new(41.0, -4.0, 700.0).validate().is_ok());
        assert!(Observer::new(91.0, 0.0, 0.0).validate().is_err());
        assert!(Observer::new(0.0, f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_separation() {
        let a = HorizontalPosition {
            azimuth: 10.0,
            zenith: 90.0,
        };
        let b = HorizontalPosition {
            azimuth: 20.0,
            zenith: 90.0,
        };
        assert_relative_eq!(a.separation(&b), 10.0, epsilon = 1e-9);

        // Azimuth is meaningless at the zenith
        let c = HorizontalPosition {
            azimuth: 0.0,
            zenith: 0.0,
        };
        let d = HorizontalPosition {
            azimuth: 180.0,
            zenith: 0.0,
        };
        assert_relative_eq!(c.separation(&d), 0.0, epsilon = 1e-6);
    }
}
