//! Measurement hook invoked by the workers.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Something that takes a measurement when the tracker is in position.
///
/// Any `FnMut() -> anyhow::Result<()>` closure is an instrument. Failures are
/// logged and never stop the worker that triggered them.
pub trait Instrument: Send {
    fn measure(&mut self) -> anyhow::Result<()>;
}

impl<F> Instrument for F
where
    F: FnMut() -> anyhow::Result<()> + Send,
{
    fn measure(&mut self) -> anyhow::Result<()> {
        self()
    }
}

/// Run one measurement, logging any failure or panic.
///
/// Returns whether the measurement succeeded.
pub(crate) fn measure_logged(instrument: &mut dyn Instrument) -> bool {
    match catch_unwind(AssertUnwindSafe(|| instrument.measure())) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Instrument callback failed: {e:#}");
            false
        }
        Err(_) => {
            error!("Instrument callback panicked");
            false
        }
    }
}
