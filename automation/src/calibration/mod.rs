//! Calibration sweeps around the sun or moon.
//!
//! # Sweep Overview
//!
//! A sweep visits a fixed list of offsets (see [`pattern`]) around the body.
//! At each point the worker:
//!
//! 1. Computes the body position for the middle of the coming measurement
//! 2. Moves the device to body + offset
//! 3. Counts down the remaining settle time, logging `COUNTDOWN:<n>` once a
//!    second down to `COUNTDOWN:0`
//! 4. Triggers the instrument (or, without one, leaves `COUNTDOWN:0` as the
//!    operator's cue) and waits up to `instrument_delay` for it
//!
//! The device's movement time is taken out of the countdown. When the move
//! alone takes at least as long as the countdown the run fails with
//! [`AutomationError::CalibrationTimingInfeasible`] instead of shortening the
//! measurement. A countdown of 0 disables the budget entirely.

mod black;
mod measurement;
pub mod pattern;

use std::fmt;
use std::time::Duration;

use ephemeris::{Observer, PositionProvider};
use hardware::solys::SolysError;
use hardware::SharedPositioner;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use black::{black_offset, measure_black, BlackMeasurement};
pub use pattern::{generate, AxisRange, CalibrationPoint, PatternKind};

use crate::error::{AutomationError, AutomationResult};
use crate::instrument::Instrument;
use crate::target;
use crate::worker::{Flow, Schedule, TickContext};
use measurement::{MeasurementThread, Wait};

/// Sweep geometry and timing, in degrees and seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParameters {
    pub azimuth: AxisRange,
    pub zenith: AxisRange,
    /// Time from the start of a move to the measurement trigger; 0 disables
    /// the countdown.
    pub countdown: f64,
    /// Time the instrument needs per point; 0 waits as long as it takes.
    pub instrument_delay: f64,
    /// Pause after each measurement.
    pub post_wait: f64,
    /// Typical duration of one move.
    pub movement_delay: f64,
    /// Safety margin added to `movement_delay`.
    pub delay_margin: f64,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            azimuth: AxisRange::default(),
            zenith: AxisRange::default(),
            countdown: 15.0,
            instrument_delay: 5.0,
            post_wait: 0.0,
            movement_delay: 5.0,
            delay_margin: 2.0,
        }
    }
}

impl CalibrationParameters {
    /// Expected movement time including margin.
    pub fn movement_estimate(&self) -> f64 {
        self.movement_delay + self.delay_margin
    }

    /// Reject timings that are not a representable number of seconds and a
    /// countdown the device cannot settle within.
    pub fn check_timing(&self) -> AutomationResult<()> {
        let timings = [
            ("countdown", self.countdown),
            ("instrument_delay", self.instrument_delay),
            ("post_wait", self.post_wait),
            ("movement_delay", self.movement_delay),
            ("delay_margin", self.delay_margin),
        ];
        for (name, value) in timings {
            duration(name, value)?;
        }
        self.lookahead()?;
        let estimate = self.movement_estimate();
        if self.countdown > 0.0 && estimate >= self.countdown {
            return Err(AutomationError::CalibrationTimingInfeasible {
                countdown: self.countdown,
                movement_delay: estimate,
            });
        }
        Ok(())
    }

    /// How far ahead the body position is computed for a point.
    fn lookahead(&self) -> AutomationResult<Duration> {
        duration("lookahead", self.countdown + self.instrument_delay / 2.0)
    }

    fn instrument_budget(&self) -> AutomationResult<Option<Duration>> {
        if self.instrument_delay > 0.0 {
            duration("instrument_delay", self.instrument_delay).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn duration(name: &str, seconds: f64) -> AutomationResult<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        AutomationError::InvalidParameters(format!(
            "{name} must be a non-negative number of seconds, got {seconds}"
        ))
    })
}

/// Tally of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CalibrationReport {
    pub total: usize,
    /// Points where the device reached the target and the countdown ran out.
    pub completed: usize,
    /// Points the device rejected.
    pub failed: usize,
}

impl CalibrationReport {
    /// Points never finished because the run stopped early.
    pub fn skipped(&self) -> usize {
        self.total - self.completed - self.failed
    }
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} points completed, {} failed, {} skipped",
            self.completed,
            self.total,
            self.failed,
            self.skipped()
        )
    }
}

enum PointOutcome {
    Completed,
    Stopped,
}

/// Runs a cross or mesh sweep as a finite [`Schedule`], one point per tick.
pub struct CalibrationWorker {
    kind: PatternKind,
    parameters: CalibrationParameters,
    positioner: SharedPositioner,
    provider: Box<dyn PositionProvider>,
    observer: Option<Observer>,
    instrument: Option<Box<dyn Instrument>>,
    measurement: Option<MeasurementThread>,
    points: Vec<CalibrationPoint>,
    next: usize,
    report: CalibrationReport,
}

impl CalibrationWorker {
    pub fn new(
        kind: PatternKind,
        parameters: CalibrationParameters,
        positioner: SharedPositioner,
        provider: Box<dyn PositionProvider>,
    ) -> Self {
        Self {
            kind,
            parameters,
            positioner,
            provider,
            observer: None,
            instrument: None,
            measurement: None,
            points: Vec::new(),
            next: 0,
            report: CalibrationReport::default(),
        }
    }

    /// Observer to use instead of the location stored on the device.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_instrument(mut self, instrument: impl Instrument + 'static) -> Self {
        self.instrument = Some(Box::new(instrument));
        self
    }

    pub fn parameters(&self) -> &CalibrationParameters {
        &self.parameters
    }

    /// Points of the sweep, available once the worker has started.
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn report(&self) -> CalibrationReport {
        self.report
    }

    fn observer(&self) -> AutomationResult<Observer> {
        self.observer.ok_or_else(|| {
            AutomationError::InvalidParameters("calibration observer not resolved".to_string())
        })
    }

    fn run_point(
        &mut self,
        ctx: &TickContext,
        point: CalibrationPoint,
    ) -> AutomationResult<PointOutcome> {
        if let Some(measurement) = self.measurement.as_mut() {
            if measurement.is_pending() {
                info!("Waiting for the previous measurement to finish");
                if measurement.wait(ctx, None) == Wait::Stopped {
                    return Ok(PointOutcome::Stopped);
                }
            }
        }

        // Only the move counts against the countdown.
        let started = ctx.now();
        let observer = self.observer()?;
        let body = self
            .provider
            .position(ctx.utc() + self.parameters.lookahead()?, &observer)?;
        let azimuth = body.azimuth + point.azimuth_offset;
        let zenith = body.zenith + point.zenith_offset;
        target::lock(&self.positioner).set_position(azimuth, zenith)?;
        info!(
            "Point {}/{} {point}: az={azimuth:.4} ze={zenith:.4}",
            self.next,
            self.points.len()
        );

        let countdown = self.parameters.countdown;
        if countdown > 0.0 {
            let moved = ctx.now().saturating_duration_since(started).as_secs_f64();
            let movement = self.parameters.movement_estimate().max(moved);
            let remaining = countdown - movement;
            if remaining <= 0.0 {
                error!("Movement took {movement:.2} s, countdown is only {countdown:.2} s");
                return Err(AutomationError::CalibrationTimingInfeasible {
                    countdown,
                    movement_delay: movement,
                });
            }
            if run_countdown(ctx, remaining) {
                return Ok(PointOutcome::Stopped);
            }
        } else {
            info!("COUNTDOWN:0");
        }

        let budget = self.parameters.instrument_budget()?;
        if let Some(measurement) = self.measurement.as_mut() {
            if measurement.trigger() {
                match measurement.wait(ctx, budget) {
                    Wait::Done(_) => {}
                    Wait::Overrun => warn!(
                        "Instrument still busy after {:.2} s",
                        self.parameters.instrument_delay
                    ),
                    Wait::Stopped => return Ok(PointOutcome::Stopped),
                }
            }
        }

        if self.parameters.post_wait > 0.0
            && ctx.sleep(duration("post_wait", self.parameters.post_wait)?)
        {
            return Ok(PointOutcome::Stopped);
        }
        Ok(PointOutcome::Completed)
    }
}

/// Sleep `seconds`, logging whole seconds left. Returns `true` if stopped.
fn run_countdown(ctx: &TickContext, seconds: f64) -> bool {
    let whole = seconds.floor();
    if ctx.sleep(Duration::from_secs_f64(seconds - whole)) {
        return true;
    }
    for left in (1..=whole as u64).rev() {
        info!("COUNTDOWN:{left}");
        if ctx.sleep(Duration::from_secs(1)) {
            return true;
        }
    }
    info!("COUNTDOWN:0");
    false
}

/// Device rejections that only cost the current point.
fn is_point_failure(error: &AutomationError) -> bool {
    matches!(
        error,
        AutomationError::Device(
            SolysError::PositionOutOfRange { .. } | SolysError::Protocol { .. }
        )
    )
}

impl Schedule for CalibrationWorker {
    fn name(&self) -> &str {
        match self.kind {
            PatternKind::Cross => "cross calibration",
            PatternKind::Mesh => "mesh calibration",
        }
    }

    fn prepare(&mut self, ctx: &TickContext) -> AutomationResult<()> {
        if let Err(e) = self.parameters.check_timing() {
            error!("Calibration rejected: {e}");
            return Err(e);
        }
        self.points = generate(self.kind, &self.parameters.azimuth, &self.parameters.zenith)?;
        self.report = CalibrationReport {
            total: self.points.len(),
            ..CalibrationReport::default()
        };

        let observer = target::resolve_observer(self.observer, &self.positioner)?;
        self.observer = Some(observer);
        target::disable_power_save(&self.positioner)?;

        let body = self.provider.position(ctx.utc(), &observer)?;
        target::lock(&self.positioner).set_position(body.azimuth, body.zenith)?;
        info!(
            "Starting {} {} sweep of {} points from az={:.4} ze={:.4}",
            self.provider.body(),
            self.kind,
            self.points.len(),
            body.azimuth,
            body.zenith
        );

        if let Some(instrument) = self.instrument.take() {
            self.measurement = Some(MeasurementThread::spawn(instrument));
        }
        Ok(())
    }

    fn tick(&mut self, ctx: &TickContext) -> AutomationResult<Flow> {
        let Some(&point) = self.points.get(self.next) else {
            info!("Calibration finished: {}", self.report);
            return Ok(Flow::Finished);
        };
        self.next += 1;

        match self.run_point(ctx, point) {
            Ok(PointOutcome::Completed) => self.report.completed += 1,
            Ok(PointOutcome::Stopped) => {
                info!("Calibration stopped: {}", self.report);
                return Ok(Flow::Finished);
            }
            Err(e) if is_point_failure(&e) => {
                error!("Point {point} failed: {e}");
                self.report.failed += 1;
            }
            Err(e) => return Err(e),
        }

        if self.next == self.points.len() {
            info!("Calibration finished: {}", self.report);
            return Ok(Flow::Finished);
        }
        Ok(Flow::Continue)
    }
}
