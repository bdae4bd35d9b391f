// Device status codes and transaction results

use std::fmt;

use super::value::TransactionValue;

/// Status byte returned by the device in every response frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 0x00,
    InvalidCommand = 0x01,
    QueueFull = 0x02,
    InvalidChecksum = 0x03,
    InvalidLength = 0x04,
    InvalidFormat = 0x05,
    InvalidProcessingError = 0x06,
    Timeout = 0x07,
    BufferOverflow = 0x08,
    InvalidData = 0x09,
    NotReady = 0x0A,
    Busy = 0x0B,
    ExecFailure = 0x0C,
    Estop = 0x0D,
    InterfaceNotActive = 0x0E,
    WatchdogExpired = 0x0F,
    InvalidConfigKey = 0x10,
    NotImplemented = 0x11,
}

impl StatusCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        let status = match raw {
            0x00 => Self::Ok,
            0x01 => Self::InvalidCommand,
            0x02 => Self::QueueFull,
            0x03 => Self::InvalidChecksum,
            0x04 => Self::InvalidLength,
            0x05 => Self::InvalidFormat,
            0x06 => Self::InvalidProcessingError,
            0x07 => Self::Timeout,
            0x08 => Self::BufferOverflow,
            0x09 => Self::InvalidData,
            0x0A => Self::NotReady,
            0x0B => Self::Busy,
            0x0C => Self::ExecFailure,
            0x0D => Self::Estop,
            0x0E => Self::InterfaceNotActive,
            0x0F => Self::WatchdogExpired,
            0x10 => Self::InvalidConfigKey,
            0x11 => Self::NotImplemented,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InvalidCommand => "INVALID_COMMAND",
            Self::QueueFull => "QUEUE_FULL",
            Self::InvalidChecksum => "INVALID_CHECKSUM",
            Self::InvalidLength => "INVALID_LENGTH",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidProcessingError => "INVALID_PROCESSING_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::BufferOverflow => "BUFFER_OVERFLOW",
            Self::InvalidData => "INVALID_DATA",
            Self::NotReady => "NOT_READY",
            Self::Busy => "BUSY",
            Self::ExecFailure => "EXEC_FAILURE",
            Self::Estop => "ESTOP",
            Self::InterfaceNotActive => "INTERFACE_NOT_ACTIVE",
            Self::WatchdogExpired => "WATCHDOG_EXPIRED",
            Self::InvalidConfigKey => "INVALID_CONFIG_KEY",
            Self::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one completed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub control_word: u16,
    pub value: TransactionValue,
    pub status: StatusCode,
}

impl TransactionResult {
    pub fn new(control_word: u16, value: TransactionValue, status: StatusCode) -> Self {
        Self {
            control_word,
            value,
            status,
        }
    }

    pub fn ok(control_word: u16, value: TransactionValue) -> Self {
        Self::new(control_word, value, StatusCode::Ok)
    }
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "word=0x{:04X} value={} status={}",
            self.control_word, self.value, self.status
        )
    }
}
