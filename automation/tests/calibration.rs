mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use automation::calibration::{measure_black, AxisRange};
use automation::{
    AutomationError, CalibrationParameters, CalibrationReport, CalibrationWorker, PatternKind,
    SystemClock, Worker,
};
use common::{moves, virtual_clock, MockPositioner, ScriptedProvider, START};
use ephemeris::Body;
use hardware::cancel::CancelToken;
use hardware::solys::{SolysError, SunIntensity};

fn quarter_degree() -> CalibrationParameters {
    CalibrationParameters {
        azimuth: AxisRange::new(-0.5, 0.5, 0.25),
        zenith: AxisRange::new(-0.5, 0.5, 0.25),
        countdown: 10.0,
        instrument_delay: 2.0,
        ..CalibrationParameters::default()
    }
}

fn report(worker: &Worker<CalibrationWorker>) -> CalibrationReport {
    worker.schedule().map(CalibrationWorker::report).unwrap_or_default()
}

#[test]
fn test_cross_sweep_runs_every_point() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone()).share();
    let provider = ScriptedProvider::new(Body::Sun);
    let requests = provider.requests.clone();

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        quarter_degree(),
        positioner,
        Box::new(provider),
    );
    let mut worker = Worker::new(calibration, clock.clone());
    worker.start().unwrap();
    worker.wait().unwrap();

    let report = report(&worker);
    assert_eq!(report.total, 9);
    assert_eq!(report.completed, 9);
    assert_eq!(report.skipped(), 0);

    // Centering move plus one move per point.
    let moves = moves(&mock);
    assert_eq!(moves.len(), 10);
    assert_eq!(moves[0], (100.0, 40.0));

    // First point starts after the 2 s centering move and looks 10 + 2/2 s ahead.
    let requests = requests.lock().unwrap_or_else(PoisonError::into_inner).clone();
    assert_eq!((requests[1] - START).as_seconds_f64(), 13.0);
    let body = ScriptedProvider::at(13.0);
    assert_abs_diff_eq!(moves[1].0, body.azimuth - 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(moves[1].1, body.zenith, epsilon = 1e-9);

    // The last four points sweep zenith only.
    let last = requests[9];
    let body = ScriptedProvider::at((last - START).as_seconds_f64());
    assert_abs_diff_eq!(moves[9].0, body.azimuth, epsilon = 1e-9);
    assert_abs_diff_eq!(moves[9].1, body.zenith + 0.5, epsilon = 1e-9);

    // 10 s countdown minus the 7 s movement estimate, in whole seconds.
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 27]);
}

#[test]
fn test_fractional_countdown_sleeps_remainder_first() {
    let clock = virtual_clock();
    let (_mock, positioner) = MockPositioner::new(clock.clone()).share();
    let parameters = CalibrationParameters {
        azimuth: AxisRange::new(0.0, 0.0, 1.0),
        zenith: AxisRange::new(0.0, 0.0, 1.0),
        countdown: 9.5,
        ..quarter_degree()
    };
    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock.clone());
    worker.start().unwrap();
    worker.wait().unwrap();

    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_secs(1)
        ]
    );
}

#[test]
fn test_mesh_sweep_covers_grid() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone()).share();
    let parameters = CalibrationParameters {
        azimuth: AxisRange::new(-0.25, 0.25, 0.25),
        zenith: AxisRange::new(-0.25, 0.25, 0.25),
        countdown: 0.0,
        ..quarter_degree()
    };
    let calibration = CalibrationWorker::new(
        PatternKind::Mesh,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Moon)),
    );
    let mut worker = Worker::new(calibration, clock.clone());
    worker.start().unwrap();
    worker.wait().unwrap();

    let calibration = worker.schedule().unwrap();
    assert_eq!(calibration.points().len(), 9);
    assert_eq!(calibration.report().completed, 9);
    assert_eq!(moves(&mock).len(), 10);
    // No countdown, no sleeping.
    assert!(clock.sleeps().is_empty());
}

#[test]
fn test_infeasible_countdown_fails_before_moving() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone()).share();
    let parameters = CalibrationParameters {
        countdown: 6.0,
        ..quarter_degree()
    };
    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();

    match worker.wait() {
        Err(AutomationError::CalibrationTimingInfeasible {
            countdown,
            movement_delay,
        }) => {
            assert_eq!(countdown, 6.0);
            assert_eq!(movement_delay, 7.0);
        }
        other => panic!("expected infeasible timing, got {other:?}"),
    }
    assert!(moves(&mock).is_empty());
}

#[test]
fn test_slow_move_fails_the_run() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone())
        .with_move_time(Duration::from_secs(12))
        .share();
    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        quarter_degree(),
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();

    assert!(matches!(
        worker.wait(),
        Err(AutomationError::CalibrationTimingInfeasible { .. })
    ));
    assert_eq!(moves(&mock).len(), 2);
    assert_eq!(report(&worker).completed, 0);
}

#[test]
fn test_zero_countdown_ignores_move_time() {
    let clock = virtual_clock();
    let (_mock, positioner) = MockPositioner::new(clock.clone())
        .with_move_time(Duration::from_secs(60))
        .share();
    let parameters = CalibrationParameters {
        countdown: 0.0,
        ..quarter_degree()
    };
    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    worker.wait().unwrap();
    assert_eq!(report(&worker).completed, 9);
}

#[test]
fn test_rejected_point_is_skipped() {
    let clock = virtual_clock();
    let mut mock = MockPositioner::new(clock.clone());
    // Call 0 centers the device; call 3 is the third pattern point.
    mock.reject.insert(3);
    let (mock, positioner) = mock.share();

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        quarter_degree(),
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    worker.wait().unwrap();

    let report = report(&worker);
    assert_eq!(report.completed, 8);
    assert_eq!(report.failed, 1);
    assert_eq!(moves(&mock).len(), 10);
}

#[test]
fn test_aborted_device_stops_the_run() {
    let clock = virtual_clock();
    let mut mock = MockPositioner::new(clock.clone());
    mock.abort_from = Some(3);
    let (_mock, positioner) = mock.share();

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        quarter_degree(),
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();

    assert!(matches!(
        worker.wait(),
        Err(AutomationError::Device(SolysError::Aborted))
    ));
    let report = report(&worker);
    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped(), 7);
}

#[test]
fn test_instrument_triggered_at_every_point() {
    let clock = virtual_clock();
    let (_mock, positioner) = MockPositioner::new(clock.clone()).share();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        quarter_degree(),
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    )
    .with_instrument(move || -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    worker.wait().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 9);
    assert_eq!(report(&worker).completed, 9);
}

#[test]
fn test_slow_instrument_delays_next_point() {
    let clock = virtual_clock();
    let (_mock, positioner) = MockPositioner::new(clock.clone()).share();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let parameters = CalibrationParameters {
        azimuth: AxisRange::new(-0.25, 0.25, 0.25),
        zenith: AxisRange::new(0.0, 0.0, 1.0),
        countdown: 0.0,
        instrument_delay: 0.01,
        ..CalibrationParameters::default()
    };

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    )
    .with_instrument(move || -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(50));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    worker.wait().unwrap();
    assert_eq!(report(&worker).completed, 3);

    // The last measurement may still be running; dropping the worker waits for it.
    drop(worker);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_instrument_overrun_does_not_eat_countdown() {
    let clock = virtual_clock();
    let (_mock, positioner) = MockPositioner::new(clock).share();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    // Each measurement outlasts both its budget and the countdown.
    let parameters = CalibrationParameters {
        azimuth: AxisRange::new(-0.25, 0.25, 0.25),
        zenith: AxisRange::new(0.0, 0.0, 1.0),
        countdown: 0.5,
        instrument_delay: 0.1,
        movement_delay: 0.0,
        delay_margin: 0.0,
        ..CalibrationParameters::default()
    };

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    )
    .with_instrument(move || -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(600));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut worker = Worker::new(calibration, Arc::new(SystemClock));
    worker.start().unwrap();
    worker.wait().unwrap();

    let report = report(&worker);
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 0);
    drop(worker);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_dropping_stopped_worker_does_not_wait_for_instrument() {
    let clock = virtual_clock();
    let (_mock, positioner) = MockPositioner::new(clock.clone()).share();
    let started = Arc::new(AtomicUsize::new(0));
    let measuring = started.clone();
    let parameters = CalibrationParameters {
        countdown: 0.0,
        instrument_delay: 0.0,
        ..quarter_degree()
    };

    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    )
    .with_instrument(move || -> anyhow::Result<()> {
        measuring.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_secs(10));
        Ok(())
    });
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while started.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(started.load(Ordering::SeqCst), 1);
    worker.stop().unwrap();
    assert_eq!(report(&worker).completed, 0);

    let dropping = Instant::now();
    drop(worker);
    let elapsed = dropping.elapsed();
    assert!(elapsed < Duration::from_secs(5), "drop took {elapsed:?}");
}

#[test]
fn test_prepare_disables_power_save() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone()).share();
    let parameters = CalibrationParameters {
        countdown: 0.0,
        ..quarter_degree()
    };
    let calibration = CalibrationWorker::new(
        PatternKind::Mesh,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Moon)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    worker.wait().unwrap();
    assert!(!mock.lock().unwrap_or_else(PoisonError::into_inner).power_save);
}

#[test]
fn test_oversized_pattern_rejected_before_moving() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone()).share();
    let parameters = CalibrationParameters {
        azimuth: AxisRange::new(-1e6, 1e6, 1e-9),
        ..quarter_degree()
    };
    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        parameters,
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    );
    let mut worker = Worker::new(calibration, clock);
    worker.start().unwrap();
    assert!(matches!(
        worker.wait(),
        Err(AutomationError::InvalidParameters(_))
    ));
    assert!(moves(&mock).is_empty());
}

#[test]
fn test_stop_between_points() {
    let clock = virtual_clock();
    let (mock, positioner) = MockPositioner::new(clock.clone()).share();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let token: Arc<OnceLock<CancelToken>> = Arc::new(OnceLock::new());
    let stopper = token.clone();

    // The second measurement asks the worker to stop.
    let calibration = CalibrationWorker::new(
        PatternKind::Cross,
        quarter_degree(),
        positioner,
        Box::new(ScriptedProvider::new(Body::Sun)),
    )
    .with_instrument(move || -> anyhow::Result<()> {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            if let Some(token) = stopper.get() {
                token.cancel();
            }
        }
        Ok(())
    });
    let mut worker = Worker::new(calibration, clock);
    assert!(token.set(worker.cancel_token()).is_ok());
    worker.start().unwrap();
    worker.wait().unwrap();

    let report = report(&worker);
    assert!((1..=2).contains(&report.completed));
    assert_eq!(report.failed, 0);
    assert!(report.skipped() >= 7);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(moves(&mock).len(), 3);
}

#[test]
fn test_black_measurement() {
    let clock = virtual_clock();
    let mut mock = MockPositioner::new(clock.clone());
    mock.intensity = Some(SunIntensity {
        quadrants: [1.0, 2.0, 3.0, 4.0],
        total: 10.0,
    });
    let (mock, positioner) = mock.share();

    let result = measure_black(
        &positioner,
        &ScriptedProvider::new(Body::Sun),
        None,
        START,
    )
    .unwrap();

    assert_eq!(result.target, (280.0, 45.0));
    assert_eq!(result.reported, (280.0, 45.0));
    assert_eq!(result.intensity.map(|si| si.total), Some(10.0));
    assert_eq!(moves(&mock), vec![(280.0, 45.0)]);
    assert!(!mock.lock().unwrap_or_else(PoisonError::into_inner).power_save);
}
