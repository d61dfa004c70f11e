use ephemeris::EphemerisError;
use hardware::solys::SolysError;
use thiserror::Error;

/// Errors that stop an automation run.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Device error: {0}")]
    Device(#[from] SolysError),

    #[error("Position computation failed: {0}")]
    Position(#[from] EphemerisError),

    /// The device cannot settle within the configured countdown.
    #[error(
        "Calibration timing infeasible: movement takes {movement_delay:.2} s but the countdown is {countdown:.2} s"
    )]
    CalibrationTimingInfeasible { countdown: f64, movement_delay: f64 },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Worker already started")]
    AlreadyStarted,

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type AutomationResult<T> = Result<T, AutomationError>;
