// High-level KevinbotMC motor driver
//
// Runs the startup handshake, keeps the device watchdog fed from a background
// thread, and turns enable/set/config calls into transactions while skipping
// the ones that would not change anything on the device.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use semver::Version;
use tracing::{debug, error, info, trace, warn};

use super::config_key::ConfigKey;
use super::controls::MotorControl;
use super::signals::{MotorSignals, Signal};
use crate::config::WATCHDOG_IDLE;
use crate::connection::{ConnectionError, MotorConnection};
use crate::protocol::{CodecError, PackedValue, TransactionResult, TransactionValue};

/// Control words understood by the motor firmware
pub mod words {
    pub const ESTOP: u16 = 0x0002;
    pub const WATCHDOG_FEED: u16 = 0x0003;
    pub const ENABLE: u16 = 0x0004;
    pub const TARGET: u16 = 0x0005;
    pub const MODE: u16 = 0x0006;
    pub const APPLY: u16 = 0x0007;
    pub const CONFIG_APPLY: u16 = 0x2002;
    pub const FLASH_SAVE: u16 = 0x2005;
    pub const ENABLE_SIGNAL: u16 = 0x3002;
    pub const WATCHDOG_INTERVAL: u16 = 0x4000;
    pub const NAME: u16 = 0x7FF8;
    pub const FIRMWARE_VERSION: u16 = 0x7FFC;
}

/// Newest firmware this driver knows how to talk to
pub const MAX_FIRMWARE: Version = Version::new(2025, 11, 9999);

const UNKNOWN_NAME: &str = "Unknown Motor";

/// Errors raised by the motor driver
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Motor initialization fault: {0}")]
    Initialization(String),

    #[error("Motor command fault: {0}")]
    Command(String),

    #[error("Failed to spawn watchdog thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Whether the driver talks to real hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Hardware,
    /// No handshake and no command transactions; used with the simulator UI
    Simulated,
}

/// Lifecycle of a motor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Uninitialized,
    Initializing,
    Ready,
    /// Handshake failed; the connection has been stopped
    Faulted,
}

#[derive(Debug, Clone)]
struct MotorStatus {
    state: MotorState,
    name: String,
    firmware: Option<Version>,
    watchdog_interval_ms: Option<u64>,
    enabled: bool,
    control: MotorControl,
}

impl Default for MotorStatus {
    fn default() -> Self {
        Self {
            state: MotorState::Uninitialized,
            name: UNKNOWN_NAME.to_string(),
            firmware: None,
            watchdog_interval_ms: None,
            enabled: false,
            control: MotorControl::Unknown,
        }
    }
}

/// Driver for one KevinbotMC motor controller
pub struct KevinbotMc {
    connection: Arc<dyn MotorConnection>,
    mode: RunMode,
    status: Arc<Mutex<MotorStatus>>,
    signals: Arc<RwLock<MotorSignals>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    // Serializes multi-transaction commands
    command_lock: Mutex<()>,
}

impl KevinbotMc {
    /// Create a driver and subscribe it to the connection's telemetry signals
    pub fn new(connection: Arc<dyn MotorConnection>, mode: RunMode) -> Self {
        let signals = Arc::new(RwLock::new(MotorSignals::default()));

        let sink = signals.clone();
        connection.add_signal_callback(Arc::new(move |word: u16, value: &TransactionValue| {
            apply_signal(&sink, word, value);
        }));

        Self {
            connection,
            mode,
            status: Arc::new(Mutex::new(MotorStatus::default())),
            signals,
            watchdog: Mutex::new(None),
            command_lock: Mutex::new(()),
        }
    }

    /// Start the connection and, on hardware, run the handshake and watchdog feeder
    pub fn start(&self) -> Result<(), MotorError> {
        let _guard = self.command_lock.lock();

        if self.status.lock().state == MotorState::Faulted {
            return Err(MotorError::Initialization(format!(
                "{} is faulted and must be recreated",
                self.name()
            )));
        }

        if self.mode == RunMode::Simulated {
            self.connection.start()?;
            let mut status = self.status.lock();
            status.name = self.connection.name();
            status.state = MotorState::Ready;
            return Ok(());
        }

        self.status.lock().state = MotorState::Initializing;
        let initialized = self
            .connection
            .start()
            .map_err(MotorError::from)
            .and_then(|_| self.handshake())
            .and_then(|_| self.spawn_watchdog());
        if let Err(e) = initialized {
            self.connection.stop();
            self.status.lock().state = MotorState::Faulted;
            error!("Motor on {} failed to initialize: {}", self.connection.name(), e);
            return Err(e);
        }

        let mut status = self.status.lock();
        status.state = MotorState::Ready;
        info!(
            "Motor {} ready (firmware {}, watchdog {} ms)",
            status.name,
            status.firmware.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            status.watchdog_interval_ms.unwrap_or(0)
        );
        Ok(())
    }

    fn handshake(&self) -> Result<(), MotorError> {
        let name = self.connection.execute(words::NAME, &TransactionValue::Empty)?;
        let name = expect_string(name, "name")?;
        debug!("Initializing new motor: {}", name);
        self.status.lock().name = name.clone();

        let firmware = self
            .connection
            .execute(words::FIRMWARE_VERSION, &TransactionValue::Empty)?;
        let firmware = expect_string(firmware, "firmware version")?;
        debug!("{} : Firmware Version : {}", name, firmware);
        let firmware = Version::parse(&firmware).map_err(|e| {
            MotorError::Initialization(format!("invalid firmware version {:?}: {}", firmware, e))
        })?;
        self.status.lock().firmware = Some(firmware.clone());

        let watchdog = self
            .connection
            .execute(words::WATCHDOG_INTERVAL, &TransactionValue::Empty)?;
        let interval = match watchdog.value {
            TransactionValue::UnsignedInt { value, .. } => value,
            other => {
                return Err(MotorError::Initialization(format!(
                    "watchdog interval query returned {} data with status {}, expected unsigned",
                    other.kind(),
                    watchdog.status
                )));
            }
        };
        debug!("{} : Device Watchdog Timeout : {} ms", name, interval);
        self.status.lock().watchdog_interval_ms = Some(interval);

        if firmware > MAX_FIRMWARE {
            return Err(MotorError::Initialization(format!(
                "firmware {} on {} is newer than the newest supported version ({}); upgrade the driver or downgrade the motor",
                firmware, name, MAX_FIRMWARE
            )));
        }

        Ok(())
    }

    fn spawn_watchdog(&self) -> Result<(), MotorError> {
        let mut watchdog = self.watchdog.lock();
        if watchdog.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        #[cfg(test)]
        if tests::FAIL_SPAWN.with(std::cell::Cell::get) {
            return Err(MotorError::Spawn(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "thread limit reached",
            )));
        }

        let connection = self.connection.clone();
        let status = self.status.clone();
        let handle = thread::Builder::new()
            .name(format!("mc-watchdog-{}", self.connection.name()))
            .spawn(move || feed_watchdog(connection, status))
            .map_err(MotorError::Spawn)?;
        *watchdog = Some(handle);
        Ok(())
    }

    /// Stop the connection; the watchdog feeder exits on its own
    pub fn stop(&self) {
        self.connection.stop();
    }

    /// Emergency stop. Returns whether the device acknowledged it.
    pub fn e_stop(&self) -> Result<bool, MotorError> {
        let result = self.connection.execute(words::ESTOP, &TransactionValue::Empty)?;
        Ok(result.status.is_ok())
    }

    /// Enable the output stage. Returns the state the device reports,
    /// or `None` if the device did not acknowledge.
    pub fn enable(&self) -> Result<Option<bool>, MotorError> {
        self.set_enabled(true)
    }

    pub fn disable(&self) -> Result<Option<bool>, MotorError> {
        self.set_enabled(false)
    }

    fn set_enabled(&self, enabled: bool) -> Result<Option<bool>, MotorError> {
        let _guard = self.command_lock.lock();
        let result = self
            .connection
            .execute(words::ENABLE, &TransactionValue::Boolean(enabled))?;

        match result.value.as_bool() {
            Some(echoed) if result.status.is_ok() => {
                self.status.lock().enabled = echoed;
                Ok(Some(echoed))
            }
            _ => {
                let action = if enabled { "enable" } else { "disable" };
                error!("Failed to {} motor, got {}", action, result);
                Ok(None)
            }
        }
    }

    /// Enable or disable only when the cached state differs
    pub fn request_state_update(&self, enabled: bool) -> Result<Option<bool>, MotorError> {
        if enabled == self.enabled() {
            return Ok(Some(enabled));
        }
        self.set_enabled(enabled)
    }

    /// Command a new control mode and target
    ///
    /// Sends the mode only when the kind changes, the target only when it
    /// differs, and the apply only when the control differs as a whole.
    pub fn set(&self, control: MotorControl) -> Result<(), MotorError> {
        let _guard = self.command_lock.lock();
        let current = self.status.lock().control;

        if self.mode == RunMode::Hardware {
            let name = self.name();

            if !control.same_kind(&current) {
                let mode = TransactionValue::unsigned(control.index() as i64, 1)?;
                let result = self.connection.execute(words::MODE, &mode)?;
                expect_echo(&result, "unsigned", |v| matches!(v, TransactionValue::UnsignedInt { .. }))?;
                trace!("{} : New Control Mode : {} ({})", name, control.name(), result.value);
            }

            if control.target() != current.target() {
                let target = TransactionValue::Float(control.target());
                let result = self.connection.execute(words::TARGET, &target)?;
                expect_echo(&result, "float", |v| matches!(v, TransactionValue::Float(_)))?;
                trace!("{} : New Target : {}", name, result.value);
            }

            if control != current {
                let result = self.connection.execute(words::APPLY, &TransactionValue::Empty)?;
                expect_echo(&result, "empty", |v| matches!(v, TransactionValue::Empty))?;
            }
        }

        self.status.lock().control = control;
        self.signals.write().target = control.target();
        Ok(())
    }

    /// Apply one configuration setting. Floats are rounded to single precision first.
    pub fn apply_config(
        &self,
        key: ConfigKey,
        value: impl Into<PackedValue>,
    ) -> Result<(), MotorError> {
        let value = match value.into() {
            PackedValue::Float(v) => PackedValue::Float(v as f32 as f64),
            other => other,
        };
        if self.mode == RunMode::Simulated {
            return Ok(());
        }

        let _guard = self.command_lock.lock();
        let result = self.connection.execute(
            words::CONFIG_APPLY,
            &TransactionValue::packed_single(key.as_str(), value),
        )?;
        if !result.status.is_ok() {
            return Err(MotorError::Command(format!(
                "failed to apply {}, got {}; the firmware may not support this setting",
                key, result
            )));
        }
        Ok(())
    }

    /// Persist the applied configuration to device flash
    pub fn flash_save(&self) -> Result<(), MotorError> {
        let _guard = self.command_lock.lock();
        let result = self.connection.execute(words::FLASH_SAVE, &TransactionValue::Empty)?;
        if self.mode == RunMode::Hardware && !result.status.is_ok() {
            return Err(MotorError::Command(format!(
                "failed to save configuration, got {}",
                result
            )));
        }
        Ok(())
    }

    /// Ask the device to push telemetry signal `signal_id`
    pub fn enable_signal(&self, signal_id: u16) -> Result<(), MotorError> {
        let _guard = self.command_lock.lock();
        let request = TransactionValue::UnsignedInt {
            value: signal_id as u64,
            size: 2,
        };
        let result = self.connection.execute(words::ENABLE_SIGNAL, &request)?;
        if self.mode == RunMode::Hardware && !result.status.is_ok() {
            return Err(MotorError::Command(format!(
                "failed to enable signal 0x{:04X}, got {}",
                signal_id, result
            )));
        }
        Ok(())
    }

    /// Handle one telemetry frame; registered with the connection in `new()`
    pub fn signal_handler(&self, word: u16, value: &TransactionValue) {
        apply_signal(&self.signals, word, value);
    }

    pub fn name(&self) -> String {
        self.status.lock().name.clone()
    }

    pub fn enabled(&self) -> bool {
        self.status.lock().enabled
    }

    /// Snapshot of the latest telemetry
    pub fn signals(&self) -> MotorSignals {
        *self.signals.read()
    }

    pub fn firmware_version(&self) -> Option<Version> {
        self.status.lock().firmware.clone()
    }

    pub fn watchdog_interval(&self) -> Option<Duration> {
        self.status.lock().watchdog_interval_ms.map(Duration::from_millis)
    }

    pub fn current_control(&self) -> MotorControl {
        self.status.lock().control
    }

    pub fn state(&self) -> MotorState {
        self.status.lock().state
    }

    /// Whether the watchdog feeder thread is alive
    pub fn watchdog_running(&self) -> bool {
        self.watchdog
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn expect_string(result: TransactionResult, query: &str) -> Result<String, MotorError> {
    match result.value {
        TransactionValue::String(value) => Ok(value),
        other => Err(MotorError::Initialization(format!(
            "{} query returned {} data with status {}, expected string",
            query,
            other.kind(),
            result.status
        ))),
    }
}

fn expect_echo(
    result: &TransactionResult,
    expected: &str,
    check: impl Fn(&TransactionValue) -> bool,
) -> Result<(), MotorError> {
    if check(&result.value) {
        return Ok(());
    }
    Err(MotorError::Command(format!(
        "word 0x{:04X} returned {} data, expected {} ({})",
        result.control_word,
        result.value.kind(),
        expected,
        result.status
    )))
}

fn apply_signal(signals: &RwLock<MotorSignals>, word: u16, value: &TransactionValue) {
    let Some(signal) = Signal::from_word(word) else {
        error!("Unknown signal word: 0x{:04X}", word);
        return;
    };
    let Some(value) = value.as_f32() else {
        error!(
            "Got {} data for signal {:?}, expected float",
            value.kind(),
            signal
        );
        return;
    };
    signals.write().apply(signal, value);
}

fn feed_watchdog(connection: Arc<dyn MotorConnection>, status: Arc<Mutex<MotorStatus>>) {
    debug!("Watchdog feeder started for {}", connection.name());

    while connection.is_open() {
        let interval = status.lock().watchdog_interval_ms.unwrap_or(0);
        if interval == 0 {
            thread::sleep(WATCHDOG_IDLE);
            continue;
        }

        match connection.execute(words::WATCHDOG_FEED, &TransactionValue::Empty) {
            Ok(result) if !result.status.is_ok() => {
                warn!("Failed to feed watchdog, got {}", result.status);
            }
            Ok(_) => {}
            Err(e) => error!("Failed to feed watchdog: {}", e),
        }
        thread::sleep(Duration::from_millis(interval / 2));
    }

    debug!("Watchdog feeder stopped for {}", connection.name());
}
