//! Continuous body tracking.

use std::time::{Duration, Instant};

use ephemeris::{Body, Observer, PositionProvider};
use hardware::SharedPositioner;
use tracing::{debug, error, info, warn};

use crate::error::{AutomationError, AutomationResult};
use crate::instrument::{measure_logged, Instrument};
use crate::target::{self, PointingOffset};
use crate::worker::{Flow, Schedule, TickContext};

/// Typical time the Solys2 needs to complete a repositioning move.
pub const DEFAULT_MOVEMENT_DELAY: Duration = Duration::from_secs(5);

/// Tracking cadence and pointing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub body: Body,
    /// Time between the starts of consecutive repositionings.
    pub interval: Duration,
    pub offset: Option<PointingOffset>,
    /// Expected duration of one move.
    pub movement_delay: Duration,
    /// Time the instrument needs per measurement.
    pub instrument_delay: Duration,
    /// Poll the device until it reports the commanded position.
    pub wait_for_position: bool,
}

impl TrackingConfig {
    pub fn new(body: Body, interval: Duration) -> Self {
        Self {
            body,
            interval,
            offset: None,
            movement_delay: DEFAULT_MOVEMENT_DELAY,
            instrument_delay: Duration::ZERO,
            wait_for_position: false,
        }
    }

    /// How far ahead of "now" the target is computed.
    ///
    /// Without an instrument the device aims at the middle of the interval
    /// that follows the move; with one it aims at the middle of the
    /// measurement.
    pub fn lookahead(&self, with_instrument: bool) -> Duration {
        if with_instrument {
            (self.instrument_delay / 2).saturating_add(self.movement_delay)
        } else {
            (self.interval.saturating_sub(self.movement_delay) / 2).saturating_add(self.movement_delay)
        }
    }

    fn validate(&self) -> AutomationResult<()> {
        if self.interval.is_zero() {
            return Err(AutomationError::InvalidParameters(
                "tracking interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Repositions the device toward a moving body on a fixed cadence.
///
/// Each tick computes the body position, applies the optional offset, moves
/// the device, optionally measures, and sleeps out the rest of the interval.
/// Errors on a tick are logged and tracking continues with the next tick.
pub struct BodyTracker {
    config: TrackingConfig,
    positioner: SharedPositioner,
    provider: Box<dyn PositionProvider>,
    observer: Option<Observer>,
    instrument: Option<Box<dyn Instrument>>,
    last_tick: Option<Instant>,
    moves: u64,
    failures: u64,
}

impl BodyTracker {
    pub fn new(
        config: TrackingConfig,
        positioner: SharedPositioner,
        provider: Box<dyn PositionProvider>,
    ) -> Self {
        Self {
            config,
            positioner,
            provider,
            observer: None,
            instrument: None,
            last_tick: None,
            moves: 0,
            failures: 0,
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

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Successful repositionings so far.
    pub fn moves(&self) -> u64 {
        self.moves
    }

    /// Ticks whose repositioning failed.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn reposition(&mut self, ctx: &TickContext) -> AutomationResult<bool> {
        let observer = match self.observer {
            Some(observer) => observer,
            None => {
                let observer = target::resolve_observer(None, &self.positioner)?;
                self.observer = Some(observer);
                observer
            }
        };

        let lookahead = self.config.lookahead(self.instrument.is_some());
        let body = self.provider.position(ctx.utc() + lookahead, &observer)?;
        let (azimuth, mut zenith) = self.config.offset.unwrap_or_default().apply(&body);
        if zenith > target::HORIZON_ZENITH {
            debug!(
                "{} below the horizon at ze={zenith:.4}, holding at the horizon",
                self.config.body
            );
            zenith = target::HORIZON_ZENITH;
        }

        target::lock(&self.positioner).set_position(azimuth, zenith)?;
        info!(
            "Tracking {}: az={azimuth:.4} ze={zenith:.4} (lookahead {:.1} s)",
            self.config.body,
            lookahead.as_secs_f64()
        );

        if self.config.wait_for_position {
            return target::wait_position_reached(ctx, &self.positioner, azimuth, zenith);
        }
        Ok(true)
    }
}

impl Schedule for BodyTracker {
    fn name(&self) -> &str {
        match self.config.body {
            Body::Sun => "sun tracker",
            Body::Moon => "moon tracker",
        }
    }

    fn prepare(&mut self, _ctx: &TickContext) -> AutomationResult<()> {
        self.config.validate()?;
        if self.provider.body() != self.config.body {
            return Err(AutomationError::InvalidParameters(format!(
                "provider {} computes the {}, not the {}",
                self.provider.name(),
                self.provider.body(),
                self.config.body
            )));
        }
        self.observer = Some(target::resolve_observer(self.observer, &self.positioner)?);
        target::disable_power_save(&self.positioner)
    }

    fn tick(&mut self, ctx: &TickContext) -> AutomationResult<Flow> {
        let started = ctx.now();
        if let Some(previous) = self.last_tick.replace(started) {
            debug!(
                "{:.3} s since previous tick",
                started.duration_since(previous).as_secs_f64()
            );
        }

        match self.reposition(ctx) {
            Ok(true) => {
                self.moves += 1;
                if let Some(instrument) = self.instrument.as_mut() {
                    measure_logged(instrument.as_mut());
                }
            }
            Ok(false) => return Ok(Flow::Continue),
            Err(e) => {
                self.failures += 1;
                error!("Tracking tick failed: {e}");
            }
        }

        let spent = ctx.now().saturating_duration_since(started);
        match self.config.interval.checked_sub(spent) {
            Some(remaining) => {
                ctx.sleep(remaining);
            }
            None => warn!(
                "Tick took {:.2} s, longer than the {:.2} s interval",
                spent.as_secs_f64(),
                self.config.interval.as_secs_f64()
            ),
        }
        Ok(Flow::Continue)
    }
}
