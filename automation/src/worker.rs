//! Background scheduling loop with cooperative cancellation.
//!
//! A [`Schedule`] supplies one tick of work at a time; [`Worker`] runs it on
//! a dedicated thread until the schedule finishes, fails, or is stopped.
//!
//! The cancellation token is created with the worker, before the thread
//! exists, and is never reset. A stop issued between `start()` and the first
//! tick is therefore always observed.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hardware::cancel::CancelToken;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{AutomationError, AutomationResult};

/// What the loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// One unit of schedulable work.
///
/// Implementations do their own inter-tick sleeping through
/// [`TickContext::sleep`] so stop requests cut the sleep short.
pub trait Schedule: Send + 'static {
    fn name(&self) -> &str;

    /// Runs once on the worker thread before the first tick.
    fn prepare(&mut self, _ctx: &TickContext) -> AutomationResult<()> {
        Ok(())
    }

    fn tick(&mut self, ctx: &TickContext) -> AutomationResult<Flow>;
}

/// Clock and stop signal handed to every tick.
#[derive(Clone)]
pub struct TickContext {
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl TickContext {
    pub fn new(clock: Arc<dyn Clock>, cancel: CancelToken) -> Self {
        Self { clock, cancel }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep unless stopped. Returns `true` if the worker was stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.is_stopped();
        }
        self.clock.sleep(duration, &self.cancel)
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn utc(&self) -> OffsetDateTime {
        self.clock.utc()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// Lifecycle of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

type Outcome<S> = (S, AutomationResult<()>);

/// Runs a [`Schedule`] on its own thread.
///
/// # Example
///
/// ```no_run
/// use automation::{Flow, Schedule, TickContext, Worker, AutomationResult};
/// use std::time::Duration;
///
/// struct Heartbeat;
///
/// impl Schedule for Heartbeat {
///     fn name(&self) -> &str {
///         "heartbeat"
///     }
///
///     fn tick(&mut self, ctx: &TickContext) -> AutomationResult<Flow> {
///         println!("beat");
///         ctx.sleep(Duration::from_secs(1));
///         Ok(Flow::Continue)
///     }
/// }
///
/// let mut worker = Worker::with_system_clock(Heartbeat);
/// worker.start()?;
/// std::thread::sleep(Duration::from_secs(3));
/// worker.stop()?;
/// # Ok::<(), automation::AutomationError>(())
/// ```
pub struct Worker<S: Schedule> {
    name: String,
    state: Arc<Mutex<WorkerState>>,
    cancel: CancelToken,
    clock: Arc<dyn Clock>,
    schedule: Option<S>,
    handle: Option<JoinHandle<Outcome<S>>>,
}

impl<S: Schedule> Worker<S> {
    pub fn new(schedule: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: schedule.name().to_string(),
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            cancel: CancelToken::new(),
            clock,
            schedule: Some(schedule),
            handle: None,
        }
    }

    pub fn with_system_clock(schedule: S) -> Self {
        Self::new(schedule, Arc::new(SystemClock))
    }

    /// Token cancelled by [`stop`](Self::stop).
    ///
    /// Hand it to the device connection so a stop also aborts a pending
    /// reconnect loop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> WorkerState {
        *lock_state(&self.state)
    }

    /// Spawn the scheduling loop and return immediately.
    ///
    /// # Errors
    ///
    /// [`AutomationError::AlreadyStarted`] if the worker was started (or
    /// stopped) before.
    pub fn start(&mut self) -> AutomationResult<()> {
        let mut state = lock_state(&self.state);
        if *state != WorkerState::Idle {
            return Err(AutomationError::AlreadyStarted);
        }
        let mut schedule = self.schedule.take().ok_or(AutomationError::AlreadyStarted)?;
        *state = WorkerState::Running;
        drop(state);

        let ctx = TickContext::new(self.clock.clone(), self.cancel.clone());
        let shared_state = self.state.clone();
        let name = self.name.clone();

        self.handle = Some(thread::spawn(move || {
            let result = run_loop(&name, &mut schedule, &ctx);
            *lock_state(&shared_state) = WorkerState::Stopped;
            (schedule, result)
        }));
        Ok(())
    }

    /// Request cancellation and wait for the loop to exit.
    ///
    /// Returns the loop's result the first time it is observed; later calls
    /// return `Ok(())`. Safe to call at any point, including before the first
    /// tick has run.
    pub fn stop(&mut self) -> AutomationResult<()> {
        {
            let mut state = lock_state(&self.state);
            match *state {
                WorkerState::Idle => {
                    *state = WorkerState::Stopped;
                    self.cancel.cancel();
                    return Ok(());
                }
                WorkerState::Running => *state = WorkerState::StopRequested,
                WorkerState::StopRequested | WorkerState::Stopped => {}
            }
        }
        self.cancel.cancel();
        self.join()
    }

    /// Wait for the loop to finish on its own.
    pub fn wait(&mut self) -> AutomationResult<()> {
        self.join()
    }

    /// Whether the loop has exited (or never started).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// The schedule, when it is not running on the worker thread.
    pub fn schedule(&self) -> Option<&S> {
        self.schedule.as_ref()
    }

    fn join(&mut self) -> AutomationResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let outcome = handle.join();
        *lock_state(&self.state) = WorkerState::Stopped;

        match outcome {
            Ok((schedule, result)) => {
                self.schedule = Some(schedule);
                result
            }
            Err(_) => {
                error!("{} worker thread panicked", self.name);
                Err(AutomationError::WorkerPanicked)
            }
        }
    }
}

impl<S: Schedule> Drop for Worker<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.join();
    }
}

fn run_loop<S: Schedule>(name: &str, schedule: &mut S, ctx: &TickContext) -> AutomationResult<()> {
    if ctx.is_stopped() {
        info!("{name} stopped before the first tick");
        return Ok(());
    }

    info!("{name} started");
    let result = drive(schedule, ctx);
    match &result {
        Ok(ticks) => info!("{name} stopped after {ticks} ticks"),
        Err(e) => error!("{name} failed: {e}"),
    }
    result.map(|_| ())
}

fn drive<S: Schedule>(schedule: &mut S, ctx: &TickContext) -> AutomationResult<u64> {
    schedule.prepare(ctx)?;
    let mut ticks = 0;
    while !ctx.is_stopped() {
        let flow = schedule.tick(ctx)?;
        ticks += 1;
        if flow == Flow::Finished {
            break;
        }
    }
    Ok(ticks)
}

fn lock_state(state: &Mutex<WorkerState>) -> std::sync::MutexGuard<'_, WorkerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
