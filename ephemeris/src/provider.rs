//! Provider selection and the fallback decorator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::celestial::moon::{MoonAlmanac, MoonMeeus};
use crate::celestial::sun::{SunAlmanac, SunNoaa};
use crate::{Body, EphemerisError, HorizontalPosition, Observer, PositionProvider};

/// Uses `primary`, falling back to `fallback` when it fails.
///
/// If both fail the fallback's error is returned.
pub struct SafeProvider {
    primary: Box<dyn PositionProvider>,
    fallback: Box<dyn PositionProvider>,
}

impl SafeProvider {
    pub fn new(primary: Box<dyn PositionProvider>, fallback: Box<dyn PositionProvider>) -> Self {
        debug_assert_eq!(primary.body(), fallback.body());
        Self { primary, fallback }
    }
}

impl fmt::Debug for SafeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeProvider")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl PositionProvider for SafeProvider {
    fn body(&self) -> Body {
        self.primary.body()
    }

    fn name(&self) -> &'static str {
        match self.body() {
            Body::Sun => "sun-safe",
            Body::Moon => "moon-safe",
        }
    }

    fn position(
        &self,
        at: OffsetDateTime,
        observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        match self.primary.position(at, observer) {
            Ok(position) => Ok(position),
            Err(e) => {
                info!(
                    "{} failed ({e}), falling back to {}",
                    self.primary.name(),
                    self.fallback.name()
                );
                self.fallback.position(at, observer)
            }
        }
    }
}

/// Selectable position providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    SunNoaa,
    SunAlmanac,
    SunSafe,
    MoonMeeus,
    MoonAlmanac,
    MoonSafe,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::SunNoaa,
        ProviderKind::SunAlmanac,
        ProviderKind::SunSafe,
        ProviderKind::MoonMeeus,
        ProviderKind::MoonAlmanac,
        ProviderKind::MoonSafe,
    ];

    /// Default provider for a body: the safe variant.
    pub fn default_for(body: Body) -> Self {
        match body {
            Body::Sun => ProviderKind::SunSafe,
            Body::Moon => ProviderKind::MoonSafe,
        }
    }

    pub fn body(self) -> Body {
        match self {
            ProviderKind::SunNoaa | ProviderKind::SunAlmanac | ProviderKind::SunSafe => Body::Sun,
            ProviderKind::MoonMeeus | ProviderKind::MoonAlmanac | ProviderKind::MoonSafe => {
                Body::Moon
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::SunNoaa => "sun-noaa",
            ProviderKind::SunAlmanac => "sun-almanac",
            ProviderKind::SunSafe => "sun-safe",
            ProviderKind::MoonMeeus => "moon-meeus",
            ProviderKind::MoonAlmanac => "moon-almanac",
            ProviderKind::MoonSafe => "moon-safe",
        }
    }

    pub fn build(self) -> Box<dyn PositionProvider> {
        match self {
            ProviderKind::SunNoaa => Box::new(SunNoaa),
            ProviderKind::SunAlmanac => Box::new(SunAlmanac),
            ProviderKind::SunSafe => Box::new(SafeProvider::new(
                Box::new(SunNoaa),
                Box::new(SunAlmanac),
            )),
            ProviderKind::MoonMeeus => Box::new(MoonMeeus),
            ProviderKind::MoonAlmanac => Box::new(MoonAlmanac),
            ProviderKind::MoonSafe => Box::new(SafeProvider::new(
                Box::new(MoonMeeus),
                Box::new(MoonAlmanac),
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase().replace('_', "-");
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("Unknown provider '{s}', expected one of: {}", names.join(", "))
            })
    }
}
