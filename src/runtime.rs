// CLI commands on top of the motor driver
//
// Each command builds a driver from a `DriverConfig`, runs at LOOP_HZ where it
// loops, and leaves the motor disabled in neutral when it is done.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{DriverConfig, LOOP_HZ};
use crate::connection::{MotorConnection, SerialConnection, SimulatorConnection};
use crate::motor::{KevinbotMc, MotorControl, MotorSignals, MotorState, RunMode};

pub type RuntimeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Drive modes selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DriveMode {
    Neutral,
    Coast,
    Brake,
    Torque,
    Velocity,
}

impl DriveMode {
    pub fn control(self, target: f32) -> MotorControl {
        match self {
            DriveMode::Neutral => MotorControl::Neutral,
            DriveMode::Coast => MotorControl::Coast,
            DriveMode::Brake => MotorControl::Brake,
            DriveMode::Torque => MotorControl::Torque(target),
            DriveMode::Velocity => MotorControl::Velocity(target),
        }
    }
}

/// Identity reported by the `info` command
#[derive(Debug, Clone, Serialize)]
pub struct MotorInfo {
    pub name: String,
    pub firmware: Option<String>,
    pub watchdog_ms: Option<u64>,
    pub ready: bool,
}

/// One line of `monitor` output
#[derive(Debug, Clone, Serialize)]
pub struct SignalSample {
    pub elapsed_ms: u128,
    pub signals: MotorSignals,
}

/// Build and start a driver for the configured port, or the simulator
pub fn connect(config: &DriverConfig, simulated: bool) -> RuntimeResult<KevinbotMc> {
    let (connection, mode): (Arc<dyn MotorConnection>, RunMode) = if simulated {
        (Arc::new(SimulatorConnection::default()), RunMode::Simulated)
    } else {
        info!("Opening motor connection on {} at {} baud", config.port, config.baud);
        let connection = SerialConnection::open(&config.port, config.baud)
            .with_retry_policy(config.retries, config.timeout());
        (Arc::new(connection), RunMode::Hardware)
    };

    let motor = KevinbotMc::new(connection, mode);
    motor.start()?;
    Ok(motor)
}

pub fn info(motor: &KevinbotMc) -> MotorInfo {
    MotorInfo {
        name: motor.name(),
        firmware: motor.firmware_version().map(|v| v.to_string()),
        watchdog_ms: motor.watchdog_interval().map(|d| d.as_millis() as u64),
        ready: motor.state() == MotorState::Ready,
    }
}

/// Subscribe to `signals` and hand a snapshot to `sink` every tick for `duration`
pub fn monitor(
    motor: &KevinbotMc,
    signals: &[u16],
    duration: Duration,
    mut sink: impl FnMut(&SignalSample),
) -> RuntimeResult<()> {
    for &signal in signals {
        motor.enable_signal(signal)?;
    }
    info!("Monitoring {} signal(s) for {:?}", signals.len(), duration);

    run_for(duration, |elapsed| {
        sink(&SignalSample {
            elapsed_ms: elapsed.as_millis(),
            signals: motor.signals(),
        });
        Ok(())
    })
}

/// Enable the motor, hold `control` for `duration`, then return to neutral and disable
pub fn drive(motor: &KevinbotMc, control: MotorControl, duration: Duration) -> RuntimeResult<()> {
    info!("Driving {} with {:?} for {:?}", motor.name(), control, duration);

    let result = run_for(duration, |_| {
        if motor.request_state_update(true)? != Some(true) {
            warn!("Motor {} did not acknowledge enable", motor.name());
        }
        motor.set(control)?;
        Ok(())
    });

    // Always try to leave the motor safe, even if the loop failed
    let neutral = motor.set(MotorControl::Neutral);
    let disabled = motor.disable();
    result?;
    neutral?;
    disabled?;
    Ok(())
}

/// Apply every configured setting, then optionally persist to flash
pub fn configure(motor: &KevinbotMc, config: &DriverConfig) -> RuntimeResult<usize> {
    for (key, value) in &config.settings {
        info!("Applying {} = {:?}", key, value);
        motor.apply_config(*key, value.clone())?;
    }
    if config.flash_save {
        info!("Saving configuration to flash");
        motor.flash_save()?;
    }
    Ok(config.settings.len())
}

fn run_for(
    duration: Duration,
    mut tick: impl FnMut(Duration) -> RuntimeResult<()>,
) -> RuntimeResult<()> {
    let period = Duration::from_millis(1000 / LOOP_HZ);
    let started = Instant::now();

    loop {
        let elapsed = started.elapsed();
        if elapsed >= duration {
            return Ok(());
        }
        tick(elapsed)?;
        thread::sleep(period.min(duration.saturating_sub(started.elapsed())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{ConfigKey, Signal};
    use crate::protocol::{PackedValue, TransactionValue};

    fn sim_motor() -> (KevinbotMc, Arc<SimulatorConnection>) {
        let sim = Arc::new(SimulatorConnection::new("Bench").with_watchdog_ms(0));
        let motor = KevinbotMc::new(sim.clone(), RunMode::Hardware);
        motor.start().unwrap();
        (motor, sim)
    }

    #[test]
    fn test_info_reports_identity() {
        let (motor, _sim) = sim_motor();
        let info = info(&motor);
        assert_eq!(info.name, "Bench");
        assert_eq!(info.firmware.as_deref(), Some("0.0.1"));
        assert_eq!(info.watchdog_ms, Some(0));
        assert!(info.ready);
        motor.stop();
    }

    #[test]
    fn test_drive_leaves_motor_safe() {
        let (motor, sim) = sim_motor();
        drive(&motor, DriveMode::Velocity.control(2.0), Duration::from_millis(250)).unwrap();

        assert_eq!(motor.current_control(), MotorControl::Neutral);
        assert!(!motor.enabled());
        assert!(!sim.enabled());
        motor.stop();
    }

    #[test]
    fn test_monitor_samples_signals() {
        let (motor, sim) = sim_motor();
        sim.inject(Signal::Velocity.word(), &TransactionValue::Float(4.2));

        let mut samples = Vec::new();
        monitor(
            &motor,
            &[Signal::Velocity.word()],
            Duration::from_millis(250),
            |sample| samples.push(sample.clone()),
        )
        .unwrap();

        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.signals.velocity.rad_s == 4.2));
        motor.stop();
    }

    #[test]
    fn test_configure_applies_settings() {
        let (motor, _sim) = sim_motor();
        let mut config = DriverConfig {
            flash_save: true,
            ..DriverConfig::default()
        };
        config
            .settings
            .insert(ConfigKey::VelocityPidP, PackedValue::Float(0.25));
        config
            .settings
            .insert(ConfigKey::DeviceUserName, PackedValue::from("Bench"));

        assert_eq!(configure(&motor, &config).unwrap(), 2);
        motor.stop();
    }

    #[test]
    fn test_drive_mode_controls() {
        assert_eq!(DriveMode::Brake.control(5.0), MotorControl::Brake);
        assert_eq!(DriveMode::Torque.control(0.3), MotorControl::Torque(0.3));
    }
}
