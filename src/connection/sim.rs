// In-memory simulator backend
//
// Answers the control words the motor facade uses with canned responses so the
// driver can run without hardware. State changes can be mirrored to an
// external UI through a `SimInspector`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, trace};

use super::{CallbackRegistry, ConnectionError, FrameCallback, MotorConnection};
use crate::protocol::{StatusCode, TransactionResult, TransactionValue};

/// Inspector window that receives simulator payloads
pub const INSPECTOR_WINDOW: &str = "kevinbotmc.motor";

pub const SIM_NAME: &str = "Simulated Motor";
pub const SIM_FIRMWARE: &str = "0.0.1";
pub const SIM_WATCHDOG_MS: u64 = 1000;

/// Receiver of simulator UI updates
pub trait SimInspector: Send + Sync {
    fn send(&self, window: &str, payload: serde_json::Value);
}

#[derive(Debug, Default)]
struct SimState {
    enabled: bool,
    mode: u64,
    target: f32,
}

/// Connection that emulates a motor in memory
pub struct SimulatorConnection {
    name: String,
    firmware: String,
    watchdog_ms: u64,
    state: Mutex<SimState>,
    started: AtomicBool,
    callbacks: CallbackRegistry,
    inspector: Option<Box<dyn SimInspector>>,
}

impl Default for SimulatorConnection {
    fn default() -> Self {
        Self::new(SIM_NAME)
    }
}

impl SimulatorConnection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            firmware: SIM_FIRMWARE.to_string(),
            watchdog_ms: SIM_WATCHDOG_MS,
            state: Mutex::new(SimState::default()),
            started: AtomicBool::new(false),
            callbacks: CallbackRegistry::deduplicated(),
            inspector: None,
        }
    }

    /// Report a different firmware version from the version query
    pub fn with_firmware(mut self, version: &str) -> Self {
        self.firmware = version.to_string();
        self
    }

    /// Report a different watchdog interval from the watchdog query
    pub fn with_watchdog_ms(mut self, interval_ms: u64) -> Self {
        self.watchdog_ms = interval_ms;
        self
    }

    pub fn with_inspector(mut self, inspector: Box<dyn SimInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Push a telemetry frame to registered listeners, as a device would
    pub fn inject(&self, control_word: u16, value: &TransactionValue) {
        self.callbacks.dispatch(control_word, value);
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().enabled
    }

    fn notify(&self, payload: serde_json::Value) {
        if let Some(inspector) = &self.inspector {
            inspector.send(INSPECTOR_WINDOW, payload);
        }
    }

    fn respond(&self, control_word: u16, value: &TransactionValue) -> TransactionResult {
        let ok = |value| TransactionResult::ok(control_word, value);
        let invalid =
            || TransactionResult::new(control_word, TransactionValue::Empty, StatusCode::InvalidData);

        match (control_word, value) {
            // Name, firmware and watchdog queries
            (0x7FF8, _) => ok(TransactionValue::String(self.name.clone())),
            (0x7FFC, _) => ok(TransactionValue::String(self.firmware.clone())),
            (0x4000, _) => ok(TransactionValue::UnsignedInt {
                value: self.watchdog_ms,
                size: 4,
            }),
            // Watchdog feed
            (0x0003, _) => ok(TransactionValue::Empty),
            // E-stop
            (0x0002, _) => {
                self.state.lock().enabled = false;
                ok(TransactionValue::Empty)
            }
            (0x0004, TransactionValue::Boolean(enabled)) => {
                self.state.lock().enabled = *enabled;
                self.notify(json!({
                    "type": "status",
                    "name": self.name,
                    "enabled": enabled,
                }));
                ok(TransactionValue::Boolean(*enabled))
            }
            (0x0005, TransactionValue::Float(target)) => {
                self.state.lock().target = *target;
                self.notify(json!({
                    "type": "control",
                    "name": self.name,
                    "target": target,
                }));
                ok(TransactionValue::Float(*target))
            }
            (0x0006, TransactionValue::UnsignedInt { value, size }) => {
                self.state.lock().mode = *value;
                ok(TransactionValue::UnsignedInt {
                    value: *value,
                    size: *size,
                })
            }
            (0x0007, _) => {
                let (mode, target) = {
                    let state = self.state.lock();
                    (state.mode, state.target)
                };
                self.notify(json!({
                    "type": "control",
                    "name": self.name,
                    "mode": mode,
                    "target": target,
                }));
                ok(TransactionValue::Empty)
            }
            (0x2002, TransactionValue::Packed(_)) => ok(TransactionValue::Empty),
            (0x2005, _) => ok(TransactionValue::Empty),
            (0x3002, TransactionValue::UnsignedInt { value, size }) => {
                ok(TransactionValue::UnsignedInt {
                    value: *value,
                    size: *size,
                })
            }
            (0x0004 | 0x0005 | 0x0006 | 0x2002 | 0x3002, _) => invalid(),
            _ => TransactionResult::new(
                control_word,
                TransactionValue::Empty,
                StatusCode::NotImplemented,
            ),
        }
    }
}

impl MotorConnection for SimulatorConnection {
    fn start(&self) -> Result<(), ConnectionError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Starting simulated motor {}", self.name);

        let state = self.state.lock();
        self.notify(json!({ "type": "create", "name": self.name }));
        self.notify(json!({
            "type": "status",
            "name": self.name,
            "enabled": state.enabled,
            "fw_version": self.firmware,
            "watchdog": self.watchdog_ms,
            "mode": state.mode,
            "target": state.target,
        }));
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    fn execute(
        &self,
        control_word: u16,
        value: &TransactionValue,
    ) -> Result<TransactionResult, ConnectionError> {
        value.encode()?;
        let result = self.respond(control_word, value);
        trace!("Simulated word 0x{:04X} -> {}", control_word, result);
        Ok(result)
    }

    fn execute_with(
        &self,
        control_word: u16,
        value: &TransactionValue,
        _retries: u32,
        _timeout: Duration,
    ) -> Result<TransactionResult, ConnectionError> {
        self.execute(control_word, value)
    }

    fn add_signal_callback(&self, callback: FrameCallback) {
        self.callbacks.add_signal(callback);
    }

    fn add_unsolicited_callback(&self, callback: FrameCallback) {
        self.callbacks.add_unsolicited(callback);
    }

    fn is_open(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
