// Timeouts, protocol defaults and runtime configuration
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motor::ConfigKey;
use crate::protocol::PackedValue;

// Serial defaults
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Read timeout on the serial port; keeps the reader loop responsive to stop()
pub const READ_TIMEOUT: Duration = Duration::from_millis(5);

// Transaction defaults: up to DEFAULT_RETRIES + 1 attempts of DEFAULT_TIMEOUT each
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300);

// Background thread pacing
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);
pub const DISPATCH_POLL: Duration = Duration::from_millis(10);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

// Watchdog feeder idle period when the device reports no watchdog
pub const WATCHDOG_IDLE: Duration = Duration::from_millis(100);

// CLI monitor/drive loop frequency
pub const LOOP_HZ: u64 = 10;

/// Errors loading a driver configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Driver configuration, loaded from a JSON file
///
/// ```json
/// {
///   "port": "/dev/ttyACM0",
///   "baud": 115200,
///   "signals": [2, 3],
///   "settings": { "drvMaxV": 12.0, "vPidP": 0.2 },
///   "flash_save": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub port: String,
    pub baud: u32,
    pub retries: u32,
    pub timeout_ms: u64,
    /// Telemetry signal ids to subscribe to after the handshake
    pub signals: Vec<u16>,
    /// Device settings applied with `apply_config`
    pub settings: BTreeMap<ConfigKey, PackedValue>,
    /// Persist settings to device flash after applying them
    pub flash_save: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud: DEFAULT_BAUDRATE,
            retries: DEFAULT_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            signals: Vec::new(),
            settings: BTreeMap::new(),
            flash_save: false,
        }
    }
}

impl DriverConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
