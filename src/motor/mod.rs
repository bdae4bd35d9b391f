// Motor control module for KevinbotMC controllers
//
// Provides:
// - Drive-command modes
// - Telemetry signal model and word table
// - Configuration keys
// - High-level motor driver API

pub mod config_key;
pub mod controls;
mod driver;
pub mod signals;

pub use config_key::ConfigKey;
pub use controls::MotorControl;
pub use driver::{KevinbotMc, MAX_FIRMWARE, MotorError, MotorState, RunMode, words};
pub use signals::{MotorSignals, Signal};
