//! Offset patterns swept around the body during calibration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AutomationError, AutomationResult};

/// Tolerance absorbing binary rounding of decimal steps such as 0.1.
const EPSILON: f64 = 1e-9;

/// Offsets are snapped to multiples of `1 / SNAP` degrees.
const SNAP: f64 = 1e9;

/// Largest number of offsets on one axis and of points in one sweep.
pub const MAX_POINTS: usize = 10_000;

/// Inclusive offset range swept along one axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Offsets from `min` to `max` inclusive.
    ///
    /// When `step` does not divide the range, the final offset is clamped to
    /// `max`.
    pub fn offsets(&self) -> AutomationResult<Vec<f64>> {
        if !(self.min.is_finite() && self.max.is_finite() && self.step.is_finite()) {
            return Err(AutomationError::InvalidParameters(format!(
                "non-finite offset range {self}"
            )));
        }
        if self.step <= 0.0 {
            return Err(AutomationError::InvalidParameters(format!(
                "offset step must be positive, got {}",
                self.step
            )));
        }
        if self.min > self.max {
            return Err(AutomationError::InvalidParameters(format!(
                "offset range {self} has min above max"
            )));
        }

        let span = (self.max - self.min) / self.step + EPSILON;
        if span >= MAX_POINTS as f64 {
            return Err(too_many(format!("offset range {self}")));
        }
        let steps = span.floor() as usize;
        let mut offsets: Vec<f64> = (0..=steps)
            .map(|i| round(self.min + i as f64 * self.step))
            .collect();
        if offsets.last().is_some_and(|&last| last < self.max - EPSILON) {
            offsets.push(round(self.max));
        }
        if offsets.len() > MAX_POINTS {
            return Err(too_many(format!("offset range {self}")));
        }
        Ok(offsets)
    }
}

impl Default for AxisRange {
    fn default() -> Self {
        Self::new(-1.0, 1.0, 0.1)
    }
}

impl fmt::Display for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] step {}", self.min, self.max, self.step)
    }
}

fn too_many(what: String) -> AutomationError {
    AutomationError::InvalidParameters(format!("{what} has more than {MAX_POINTS} points"))
}

/// Snap to the nanodegree grid and fold `-0.0` into `0.0`.
fn round(value: f64) -> f64 {
    (value * SNAP).round() / SNAP + 0.0
}

/// Shape of a calibration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// One axis at a time through the body position.
    #[default]
    Cross,
    /// Full grid of both axes.
    Mesh,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cross => f.write_str("cross"),
            Self::Mesh => f.write_str("mesh"),
        }
    }
}

impl FromStr for PatternKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cross" => Ok(Self::Cross),
            "mesh" | "matrix" => Ok(Self::Mesh),
            other => Err(AutomationError::InvalidParameters(format!(
                "unknown pattern '{other}'"
            ))),
        }
    }
}

/// Offset from the body position at which one measurement is taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub azimuth_offset: f64,
    pub zenith_offset: f64,
}

impl CalibrationPoint {
    pub fn new(azimuth_offset: f64, zenith_offset: f64) -> Self {
        Self {
            azimuth_offset,
            zenith_offset,
        }
    }

    pub fn is_center(&self) -> bool {
        self.azimuth_offset == 0.0 && self.zenith_offset == 0.0
    }
}

impl fmt::Display for CalibrationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:+.4}, {:+.4})", self.azimuth_offset, self.zenith_offset)
    }
}

/// Build the ordered list of points for a sweep.
///
/// Cross: every azimuth offset at zenith 0, then every zenith offset at
/// azimuth 0, with the center point kept only once. Mesh: azimuth-major
/// cartesian product.
pub fn generate(
    kind: PatternKind,
    azimuth: &AxisRange,
    zenith: &AxisRange,
) -> AutomationResult<Vec<CalibrationPoint>> {
    let azimuth_offsets = azimuth.offsets()?;
    let zenith_offsets = zenith.offsets()?;
    let total = match kind {
        PatternKind::Cross => azimuth_offsets.len() + zenith_offsets.len(),
        PatternKind::Mesh => azimuth_offsets.len() * zenith_offsets.len(),
    };
    if total > MAX_POINTS {
        return Err(too_many(format!("{kind} pattern")));
    }

    let points = match kind {
        PatternKind::Cross => {
            let mut points = Vec::with_capacity(azimuth_offsets.len() + zenith_offsets.len());
            let mut center_seen = false;
            let candidates = azimuth_offsets
                .iter()
                .map(|&az| CalibrationPoint::new(az, 0.0))
                .chain(zenith_offsets.iter().map(|&ze| CalibrationPoint::new(0.0, ze)));
            for point in candidates {
                if point.is_center() {
                    if center_seen {
                        continue;
                    }
                    center_seen = true;
                }
                points.push(point);
            }
            points
        }
        PatternKind::Mesh => azimuth_offsets
            .iter()
            .flat_map(|&az| {
                zenith_offsets
                    .iter()
                    .map(move |&ze| CalibrationPoint::new(az, ze))
            })
            .collect(),
    };
    Ok(points)
}
