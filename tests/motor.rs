// Motor driver scenarios over the serial engine and a scripted device

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kevinbot_mc::connection::MotorConnection;
use kevinbot_mc::motor::{
    KevinbotMc, MotorControl, MotorError, MotorSignals, MotorState, RunMode, Signal, words,
};
use kevinbot_mc::protocol::TransactionValue;
use kevinbot_mc::protocol::frame::encode_unsolicited;
use semver::Version;

use common::{FakeMotor, command_words, wait_until};

#[test]
fn test_handshake_and_watchdog_feeding() {
    let (connection, _device, log) = FakeMotor::new("LeftMotor", "1.2.0", 200).connect();
    let connection = Arc::new(connection);
    let motor = KevinbotMc::new(connection.clone(), RunMode::Hardware);

    motor.start().unwrap();
    assert_eq!(motor.state(), MotorState::Ready);
    assert_eq!(motor.name(), "LeftMotor");
    assert_eq!(motor.firmware_version(), Some(Version::new(1, 2, 0)));
    assert_eq!(motor.watchdog_interval(), Some(Duration::from_millis(200)));
    assert!(motor.watchdog_running());

    thread::sleep(Duration::from_millis(560));
    motor.stop();

    let feeds: Vec<_> = log
        .lock()
        .iter()
        .filter(|(word, _)| *word == words::WATCHDOG_FEED)
        .map(|(_, at)| *at)
        .collect();
    assert!(
        (4..=8).contains(&feeds.len()),
        "expected about 6 feeds, got {}",
        feeds.len()
    );
    let gaps: Vec<Duration> = feeds.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = gaps.iter().sum::<Duration>() / gaps.len() as u32;
    assert!(
        mean >= Duration::from_millis(90) && mean <= Duration::from_millis(160),
        "mean feed gap {:?}",
        mean
    );

    assert_eq!(
        command_words(&log)[..3],
        [words::NAME, words::FIRMWARE_VERSION, words::WATCHDOG_INTERVAL]
    );
    assert!(wait_until(Duration::from_secs(1), || !motor.watchdog_running()));
}

#[test]
fn test_firmware_newer_than_supported_faults() {
    let (connection, _device, log) = FakeMotor::new("LeftMotor", "2026.1.0", 200).connect();
    let connection = Arc::new(connection);
    let motor = KevinbotMc::new(connection.clone(), RunMode::Hardware);

    let err = motor.start().unwrap_err();
    assert!(matches!(err, MotorError::Initialization(_)));
    assert_eq!(motor.state(), MotorState::Faulted);
    assert!(!connection.is_open());
    assert!(!motor.watchdog_running());

    thread::sleep(Duration::from_millis(150));
    assert!(!log.lock().iter().any(|(word, _)| *word == words::WATCHDOG_FEED));
}

#[test]
fn test_angle_signal_updates_only_angle() {
    let (connection, device, _log) = FakeMotor::new("LeftMotor", "1.2.0", 0).connect();
    let motor = KevinbotMc::new(Arc::new(connection), RunMode::Hardware);
    motor.start().unwrap();

    device.push(&encode_unsolicited(Signal::Angle.word(), &TransactionValue::Float(1.57)).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        motor.signals().angle.rads == 1.57
    }));

    let mut expected = MotorSignals::default();
    expected.angle.rads = 1.57;
    assert_eq!(motor.signals(), expected);
    motor.stop();
}

#[test]
fn test_repeated_set_sends_nothing() {
    let (connection, _device, log) = FakeMotor::new("LeftMotor", "1.2.0", 0).connect();
    let motor = KevinbotMc::new(Arc::new(connection), RunMode::Hardware);
    motor.start().unwrap();

    motor.set(MotorControl::Velocity(3.0)).unwrap();
    let sent = command_words(&log).len();
    motor.set(MotorControl::Velocity(3.0)).unwrap();
    assert_eq!(command_words(&log).len(), sent);

    assert_eq!(
        command_words(&log)[3..],
        [words::MODE, words::TARGET, words::APPLY]
    );
    motor.stop();
}

#[test]
fn test_enable_round_trip_over_serial() {
    let (connection, _device, _log) = FakeMotor::new("LeftMotor", "1.2.0", 0).connect();
    let motor = KevinbotMc::new(Arc::new(connection), RunMode::Hardware);
    motor.start().unwrap();

    assert_eq!(motor.enable().unwrap(), Some(true));
    assert!(motor.enabled());
    assert_eq!(motor.request_state_update(false).unwrap(), Some(false));
    assert!(!motor.enabled());
    motor.stop();
}

#[test]
fn test_commands_after_stop_fail() {
    let (connection, _device, _log) = FakeMotor::new("LeftMotor", "1.2.0", 0).connect();
    let motor = KevinbotMc::new(Arc::new(connection), RunMode::Hardware);
    motor.start().unwrap();
    motor.stop();

    assert!(matches!(motor.enable(), Err(MotorError::Connection(_))));
}
