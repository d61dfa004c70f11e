//! Automated pointing workflows for the Solys2 tracker.
//!
//! - [`Worker`] runs a [`Schedule`] on a dedicated thread with cooperative,
//!   prompt cancellation
//! - [`BodyTracker`] keeps the device pointed at the sun or moon
//! - [`CalibrationWorker`] sweeps a cross or mesh of offsets around the body,
//!   triggering an instrument at each point
//!
//! Workers drive a [`SharedPositioner`](hardware::SharedPositioner). Only one
//! worker may drive a given device at a time.

pub mod calibration;
pub mod clock;
pub mod config;
mod error;
pub mod instrument;
pub mod target;
pub mod tracker;
pub mod worker;

pub use calibration::{
    CalibrationParameters, CalibrationPoint, CalibrationReport, CalibrationWorker, PatternKind,
};
pub use clock::{Clock, SystemClock, VirtualClock};
pub use error::{AutomationError, AutomationResult};
pub use instrument::Instrument;
pub use target::PointingOffset;
pub use tracker::{BodyTracker, TrackingConfig};
pub use worker::{Flow, Schedule, TickContext, Worker, WorkerState};
