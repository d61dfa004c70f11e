//! Test doubles for the automation workers.
//!
//! [`MockPositioner`] records every move and advances a [`VirtualClock`] by a
//! fixed move time, so schedules run at full speed while still seeing time
//! pass. [`ScriptedProvider`] returns a body position that drifts linearly
//! with the requested instant and records every request.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use automation::VirtualClock;
use ephemeris::{Body, EphemerisError, HorizontalPosition, Observer, PositionProvider};
use hardware::solys::{Axis, SolysError, SolysResult, SunIntensity};
use hardware::{Positioner, SharedPositioner};
use time::macros::datetime;
use time::OffsetDateTime;

/// Start of every virtual run.
pub const START: OffsetDateTime = datetime!(2024-06-21 10:00 UTC);

pub fn virtual_clock() -> Arc<VirtualClock> {
    Arc::new(VirtualClock::new(START))
}

pub struct MockPositioner {
    clock: Arc<VirtualClock>,
    move_time: Duration,
    position: (f64, f64),
    pub moves: Vec<(f64, f64)>,
    pub location: Option<(f64, f64)>,
    pub adjustment: (f64, f64),
    pub intensity: Option<SunIntensity>,
    /// 0-based indices of `set_position` calls rejected as out of range.
    pub reject: HashSet<usize>,
    /// Fail every `set_position` from this call index on with `Aborted`.
    pub abort_from: Option<usize>,
    /// Number of `current_position` calls.
    pub position_queries: usize,
    /// Last power save state requested; the device starts in power save.
    pub power_save: bool,
}

impl MockPositioner {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            clock,
            move_time: Duration::from_secs(2),
            position: (0.0, 0.0),
            moves: Vec::new(),
            location: Some((41.6636, -4.7058)),
            adjustment: (0.0, 0.0),
            intensity: None,
            reject: HashSet::new(),
            abort_from: None,
            position_queries: 0,
            power_save: true,
        }
    }

    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    /// Wrap in the shared handle, keeping a typed handle for inspection.
    pub fn share(self) -> (Arc<Mutex<MockPositioner>>, SharedPositioner) {
        let mock = Arc::new(Mutex::new(self));
        let shared: SharedPositioner = mock.clone();
        (mock, shared)
    }
}

impl Positioner for MockPositioner {
    fn set_position(&mut self, azimuth: f64, zenith: f64) -> SolysResult<()> {
        let call = self.moves.len();
        self.moves.push((azimuth, zenith));
        if self.abort_from.is_some_and(|from| call >= from) {
            return Err(SolysError::Aborted);
        }
        if self.reject.contains(&call) {
            return Err(SolysError::PositionOutOfRange {
                axis: Axis::Zenith,
                degrees: zenith,
                raw: "NO 7".to_string(),
            });
        }
        self.clock.advance(self.move_time);
        self.position = (azimuth.rem_euclid(360.0), zenith);
        Ok(())
    }

    fn current_position(&mut self) -> SolysResult<(f64, f64)> {
        self.position_queries += 1;
        Ok((
            self.position.0 + self.adjustment.0,
            self.position.1 + self.adjustment.1,
        ))
    }

    fn location(&mut self) -> SolysResult<(f64, f64)> {
        self.location.ok_or_else(|| SolysError::ConnectionFailed("no location".to_string()))
    }

    fn adjustment(&mut self) -> SolysResult<(f64, f64)> {
        Ok(self.adjustment)
    }

    fn set_power_save(&mut self, enabled: bool) -> SolysResult<()> {
        self.power_save = enabled;
        Ok(())
    }

    fn sun_intensity(&mut self) -> SolysResult<Option<SunIntensity>> {
        Ok(self.intensity)
    }
}

pub fn moves(mock: &Arc<Mutex<MockPositioner>>) -> Vec<(f64, f64)> {
    mock.lock().unwrap_or_else(PoisonError::into_inner).moves.clone()
}

/// Body at azimuth 100 + 0.01 deg/s and zenith 40 - 0.005 deg/s after [`START`].
pub struct ScriptedProvider {
    body: Body,
    pub requests: Arc<Mutex<Vec<OffsetDateTime>>>,
    pub failing: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(body: Body) -> Self {
        Self {
            body,
            requests: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn at(seconds: f64) -> HorizontalPosition {
        HorizontalPosition {
            azimuth: 100.0 + 0.01 * seconds,
            zenith: 40.0 - 0.005 * seconds,
        }
    }
}

impl PositionProvider for ScriptedProvider {
    fn body(&self) -> Body {
        self.body
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn position(
        &self,
        at: OffsetDateTime,
        _observer: &Observer,
    ) -> Result<HorizontalPosition, EphemerisError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(at);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EphemerisError::PositionComputation {
                body: self.body,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(Self::at((at - START).as_seconds_f64()))
    }
}
