//! Connection recovery and client behavior against a mock Solys2.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use common::{reply, standard_reply, MockSolys, Response};
use hardware::cancel::CancelToken;
use hardware::solys::{
    Axis, Command, Connection, ConnectionState, DeviceReply, ErrorCode, Payload, Solys2,
    SolysError, StatusFlags, TrackerFunction,
};

#[test]
fn test_handshake_runs_before_first_command() {
    let server = MockSolys::standard();
    let _solys = Solys2::connect(server.config()).unwrap();

    assert_eq!(server.commands(), vec!["PW solys", "PR 0", "VE"]);
    assert_eq!(server.connections(), 1);
}

#[test]
fn test_open_fails_when_password_rejected() {
    let server = MockSolys::start(|_, command| {
        if command.starts_with("PW") {
            reply("NO P")
        } else {
            standard_reply(command)
        }
    });

    let result = Connection::open(server.config());
    assert!(matches!(result, Err(SolysError::ConnectionFailed(_))));
}

#[test]
fn test_empty_reply_threshold_triggers_exactly_one_reconnect() {
    let server = MockSolys::start(|connection, command| match (connection, command) {
        (0, "CP") => Response::Silent,
        _ => standard_reply(command),
    });
    let mut connection = Connection::open(server.config()).unwrap();

    let reply = connection.exchange(&Command::current_position()).unwrap();

    assert!(matches!(
        reply,
        DeviceReply::Answered {
            payload: Payload::Position { .. },
            ..
        }
    ));
    assert_eq!(connection.reconnect_count(), 1);
    assert_eq!(connection.consecutive_empty_replies(), 0);
    assert_eq!(server.connections(), 2);
    assert_eq!(server.commands_on(0), vec!["PW solys", "PR 0", "CP"]);
    assert_eq!(server.commands_on(1), vec!["PW solys", "PR 0", "CP"]);
}

#[test]
fn test_transport_drop_reconnects_and_resends_once() {
    let server = MockSolys::start(|connection, command| match (connection, command) {
        (0, "CP") => Response::Disconnect,
        _ => standard_reply(command),
    });
    let mut connection = Connection::open(server.config()).unwrap();

    let reply = connection.exchange(&Command::current_position()).unwrap();

    assert_eq!(reply.raw(), "CP 120.5 30.25");
    assert_eq!(connection.reconnect_count(), 1);
    assert_eq!(connection.state(), ConnectionState::Connected);
    let resent = server.commands().iter().filter(|c| *c == "CP").count();
    assert_eq!(resent, 2);
}

#[test]
fn test_reconnect_keeps_retrying_until_the_device_returns() {
    // Connection 0 drops on CP, the next two refuse the handshake, then recovery
    let server = MockSolys::start(|connection, command| match (connection, command) {
        (0, "CP") => Response::Disconnect,
        (1 | 2, _) => Response::Disconnect,
        _ => standard_reply(command),
    });
    let mut connection = Connection::open(server.config()).unwrap();

    let reply = connection.exchange(&Command::current_position()).unwrap();

    assert!(!reply.is_error());
    assert_eq!(connection.reconnect_count(), 1);
    assert_eq!(server.connections(), 4);
}

#[test]
fn test_cancelled_reconnect_aborts() {
    let server = MockSolys::start(|connection, command| match connection {
        0 if command != "CP" => standard_reply(command),
        _ => Response::Disconnect,
    });
    let mut connection = Connection::open(server.config()).unwrap();
    let token = CancelToken::new();
    connection.set_cancel_token(token.clone());

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.cancel();
    });

    let result = connection.exchange(&Command::current_position());
    canceller.join().unwrap();

    assert!(matches!(result, Err(SolysError::Aborted)));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[test]
fn test_stale_reply_is_skipped() {
    let server = MockSolys::start(|_, command| match command {
        "CP" => reply("PO 1 2\rCP 5 6"),
        _ => standard_reply(command),
    });
    let mut connection = Connection::open(server.config()).unwrap();

    let reply = connection.exchange(&Command::current_position()).unwrap();

    assert_eq!(reply.raw(), "CP 5 6");
    assert_eq!(connection.reconnect_count(), 0);
}

#[test]
fn test_travel_bounds_error_is_position_out_of_range() {
    let server = MockSolys::start(|_, command| match command {
        "PO 1 120" => reply("NO 7"),
        _ => standard_reply(command),
    });
    let mut solys = Solys2::connect(server.config()).unwrap();

    let err = solys.set_position(10.0, 120.0).unwrap_err();

    match err {
        SolysError::PositionOutOfRange { axis, degrees, raw } => {
            assert_eq!(axis, Axis::Zenith);
            assert_relative_eq!(degrees, 120.0);
            assert_eq!(raw, "NO 7");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Not retried
    let moves = server.commands().iter().filter(|c| *c == "PO 1 120").count();
    assert_eq!(moves, 1);
}

#[test]
fn test_azimuth_is_wrapped() {
    let server = MockSolys::standard();
    let mut solys = Solys2::connect(server.config()).unwrap();

    solys.set_position(-90.0, 45.0).unwrap();
    solys.set_azimuth(725.5).unwrap();

    let commands = server.commands();
    assert!(commands.contains(&"PO 0 270".to_string()));
    assert!(commands.contains(&"PO 1 45".to_string()));
    assert!(commands.contains(&"PO 0 5.5".to_string()));
}

#[test]
fn test_protection_error_reauthenticates_once() {
    let homes = Arc::new(AtomicUsize::new(0));
    let counter = homes.clone();
    let server = MockSolys::start(move |_, command| match command {
        "HO" if counter.fetch_add(1, Ordering::SeqCst) == 0 => reply("NO Q"),
        _ => standard_reply(command),
    });
    let mut solys = Solys2::connect(server.config()).unwrap();

    solys.home().unwrap();

    assert_eq!(
        server.commands(),
        vec!["PW solys", "PR 0", "VE", "HO", "PW solys", "PR 0", "HO"]
    );
    assert_eq!(homes.load(Ordering::SeqCst), 2);
    assert_eq!(solys.connection().reconnect_count(), 0);
}

#[test]
fn test_persistent_protection_error_is_surfaced() {
    let server = MockSolys::start(|_, command| match command {
        "HO" => reply("NO G"),
        _ => standard_reply(command),
    });
    let mut solys = Solys2::connect(server.config()).unwrap();

    let err = solys.home().unwrap_err();

    assert!(matches!(
        err,
        SolysError::ProtectionLoop {
            code: ErrorCode::PasswordProtectedData,
            ..
        }
    ));
}

#[test]
fn test_raw_command_returns_device_error() {
    let server = MockSolys::start(|_, command| match command {
        "XX 1" => reply("NO 3"),
        _ => standard_reply(command),
    });
    let mut solys = Solys2::connect(server.config()).unwrap();

    let reply = solys.send_command("xx 1").unwrap();

    assert_eq!(
        reply,
        DeviceReply::Failed {
            code: ErrorCode::UnrecognizedCommand,
            raw: "NO 3".to_string()
        }
    );
}

#[test]
fn test_typed_queries() {
    let server = MockSolys::start(|_, command| match command {
        "IS" => reply("IS 4 0189"),
        _ => standard_reply(command),
    });
    let mut solys = Solys2::connect(server.config()).unwrap();

    let position = solys.get_current_position().unwrap();
    assert_relative_eq!(position.azimuth, 120.5);
    assert_relative_eq!(position.zenith, 30.25);
    assert_eq!(position.raw, "CP 120.5 30.25");

    let status = solys.get_status().unwrap();
    assert_eq!(status.function, Some(TrackerFunction::SunTracking));
    assert!(status.flags.contains(StatusFlags::HOMED));
    assert!(status.deactivated.contains(&"HARDWARE_FAULT"));

    let location = solys.location().unwrap();
    assert_relative_eq!(location.latitude, 41.6636);
    assert_relative_eq!(location.longitude, -4.7058);
    assert_eq!(location.pressure, Some(1013.2));

    let (az_adj, ze_adj) = solys.adjustment().unwrap();
    assert_relative_eq!(az_adj, 0.05);
    assert_relative_eq!(ze_adj, -0.1);

    let intensity = solys.sun_intensity().unwrap();
    assert_relative_eq!(intensity.total, 6.0);
    assert_eq!(solys.queue_status().unwrap(), vec![0, 2]);
    assert_eq!(solys.function().unwrap(), TrackerFunction::Standard);
    assert!(!solys.power_save().unwrap());
    assert_eq!(solys.version().unwrap(), "3.2.1 MOCK");
}

#[test]
fn test_adjustment_is_clamped() {
    let server = MockSolys::standard();
    let mut solys = Solys2::connect(server.config()).unwrap();

    solys.adjust_azimuth(1.5).unwrap();
    solys.adjust_zenith(-0.05).unwrap();

    let commands = server.commands();
    assert!(commands.contains(&"AD 0 0.2".to_string()));
    assert!(commands.contains(&"AD 1 -0.05".to_string()));
}
