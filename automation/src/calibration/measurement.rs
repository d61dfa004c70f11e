//! Instrument callbacks run on their own thread so a slow or stuck
//! instrument never blocks the sweep beyond its time budget. Dropping the
//! thread waits at most `DROP_GRACE` for a measurement in flight.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::instrument::{measure_logged, Instrument};
use crate::worker::TickContext;

/// Granularity of stop checks while waiting on the instrument.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// How long dropping the thread waits for a measurement still in flight.
const DROP_GRACE: Duration = Duration::from_secs(1);

/// Result of waiting for a triggered measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// Finished; `true` if the instrument reported success.
    Done(bool),
    /// Still running when the budget ran out.
    Overrun,
    Stopped,
}

pub(crate) struct MeasurementThread {
    trigger: Option<Sender<()>>,
    done: Receiver<bool>,
    handle: Option<JoinHandle<()>>,
    pending: bool,
}

impl MeasurementThread {
    pub(crate) fn spawn(mut instrument: Box<dyn Instrument>) -> Self {
        let (trigger_tx, trigger_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<bool>(1);

        let handle = thread::spawn(move || {
            for () in trigger_rx {
                let ok = measure_logged(instrument.as_mut());
                if done_tx.send(ok).is_err() {
                    break;
                }
            }
            debug!("Measurement thread exiting");
        });

        Self {
            trigger: Some(trigger_tx),
            done: done_rx,
            handle: Some(handle),
            pending: false,
        }
    }

    /// A measurement was triggered and has not reported back yet.
    pub(crate) fn is_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn trigger(&mut self) -> bool {
        let sent = self
            .trigger
            .as_ref()
            .is_some_and(|trigger| trigger.send(()).is_ok());
        if sent {
            self.pending = true;
        } else {
            error!("Measurement thread is gone; measurement not triggered");
        }
        sent
    }

    /// Wait for the pending measurement, at most `limit` (forever if `None`).
    pub(crate) fn wait(&mut self, ctx: &TickContext, limit: Option<Duration>) -> Wait {
        if !self.pending {
            return Wait::Done(true);
        }
        let deadline = limit.map(|limit| Instant::now() + limit);
        loop {
            if ctx.is_stopped() {
                return Wait::Stopped;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Wait::Overrun;
                    }
                    left.min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };
            match self.done.recv_timeout(slice) {
                Ok(ok) => {
                    self.pending = false;
                    return Wait::Done(ok);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.pending = false;
                    return Wait::Done(false);
                }
            }
        }
    }
}

impl Drop for MeasurementThread {
    fn drop(&mut self) {
        self.trigger.take();
        if self.pending
            && matches!(
                self.done.recv_timeout(DROP_GRACE),
                Err(RecvTimeoutError::Timeout)
            )
        {
            // The thread exits on its own once the instrument returns.
            warn!(
                "Instrument still busy after {:.1} s, detaching measurement thread",
                DROP_GRACE.as_secs_f64()
            );
            self.handle.take();
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
