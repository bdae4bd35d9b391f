// Host-side driver for KevinbotMC smart motor controllers

pub mod config;
pub mod connection;
pub mod motor;
pub mod protocol;
pub mod runtime;
pub mod transport;

pub use connection::{ConnectionError, MotorConnection, SerialConnection, SimulatorConnection};
pub use motor::{KevinbotMc, MotorControl, MotorError, MotorSignals, RunMode};
