// Motor connections
//
// Provides:
// - The `MotorConnection` contract shared by the serial engine and the simulator
// - Transaction uid generation
// - Signal/unsolicited callback registry and fan-out

pub mod serial;
pub mod sim;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::error;

use crate::protocol::{CodecError, TransactionResult, TransactionValue};

pub use serial::SerialConnection;
pub use sim::{SimInspector, SimulatorConnection};

/// Highest control word still forwarded to signal callbacks.
/// Words above it are reserved for meta and failure reporting.
pub const SIGNAL_WORD_LIMIT: u16 = 0x7FFF;

/// Listener for frames pushed by the device: `(control word, value)`
pub type FrameCallback = Arc<dyn Fn(u16, &TransactionValue) + Send + Sync>;

/// Errors raised by a motor connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("No response for control word 0x{control_word:04X} after {attempts} attempt(s)")]
    Timeout { control_word: u16, attempts: u32 },

    #[error("Connection is not open")]
    NotOpen,
}

/// Transaction engine contract
///
/// All methods take `&self` so a connection can be shared between the caller
/// and the facade's watchdog thread.
pub trait MotorConnection: Send + Sync {
    /// Open the link and start background processing. Calling it twice is harmless.
    fn start(&self) -> Result<(), ConnectionError>;

    /// Stop background processing and close the link
    fn stop(&self);

    /// Run one transaction using the connection's default retry policy
    fn execute(
        &self,
        control_word: u16,
        value: &TransactionValue,
    ) -> Result<TransactionResult, ConnectionError>;

    /// Run one transaction with up to `retries + 1` attempts of `timeout` each
    fn execute_with(
        &self,
        control_word: u16,
        value: &TransactionValue,
        retries: u32,
        timeout: Duration,
    ) -> Result<TransactionResult, ConnectionError>;

    /// Listen for telemetry signals (unsolicited frames with word <= 0x7FFF)
    fn add_signal_callback(&self, callback: FrameCallback);

    /// Listen for every unsolicited frame
    fn add_unsolicited_callback(&self, callback: FrameCallback);

    fn is_open(&self) -> bool;

    fn name(&self) -> String;
}

/// Thread-safe 16-bit transaction id counter, wrapping at 65536
#[derive(Debug, Default)]
pub struct UidGenerator {
    last: Mutex<u16>,
}

impl UidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u16 {
        let mut last = self.last.lock();
        *last = last.wrapping_add(1);
        *last
    }
}

/// Append-only callback lists with panic-isolated fan-out
#[derive(Default)]
pub struct CallbackRegistry {
    signal: RwLock<Vec<FrameCallback>>,
    unsolicited: RwLock<Vec<FrameCallback>>,
    // Ignore a callback that is already registered
    dedup: bool,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that keeps one copy of each callback, compared by `Arc` identity
    pub fn deduplicated() -> Self {
        Self {
            dedup: true,
            ..Self::default()
        }
    }

    pub fn add_signal(&self, callback: FrameCallback) {
        self.push(&self.signal, callback);
    }

    pub fn add_unsolicited(&self, callback: FrameCallback) {
        self.push(&self.unsolicited, callback);
    }

    fn push(&self, list: &RwLock<Vec<FrameCallback>>, callback: FrameCallback) {
        let mut list = list.write();
        if self.dedup && list.iter().any(|existing| Arc::ptr_eq(existing, &callback)) {
            return;
        }
        list.push(callback);
    }

    /// Deliver one unsolicited frame to every listener
    pub fn dispatch(&self, control_word: u16, value: &TransactionValue) {
        // Snapshot so callbacks may register further callbacks
        let unsolicited = self.unsolicited.read().clone();
        for callback in &unsolicited {
            invoke(callback, "unsolicited", control_word, value);
        }

        if control_word <= SIGNAL_WORD_LIMIT {
            let signal = self.signal.read().clone();
            for callback in &signal {
                invoke(callback, "signal", control_word, value);
            }
        }
    }
}

fn invoke(callback: &FrameCallback, kind: &str, control_word: u16, value: &TransactionValue) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| callback(control_word, value)));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(
            "Error in {} subscriber for word 0x{:04X}: {}",
            kind, control_word, message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_uid_wraps() {
        let uids = UidGenerator::new();
        assert_eq!(uids.next(), 1);
        assert_eq!(uids.next(), 2);
        *uids.last.lock() = u16::MAX;
        assert_eq!(uids.next(), 0);
        assert_eq!(uids.next(), 1);
    }

    #[test]
    fn test_signal_gate() {
        let registry = CallbackRegistry::new();
        let signals = Arc::new(AtomicUsize::new(0));
        let unsolicited = Arc::new(AtomicUsize::new(0));

        let s = signals.clone();
        registry.add_signal(Arc::new(move |_: u16, _: &TransactionValue| {
            s.fetch_add(1, Ordering::SeqCst);
        }));
        let u = unsolicited.clone();
        registry.add_unsolicited(Arc::new(move |_: u16, _: &TransactionValue| {
            u.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(0x0002, &TransactionValue::Float(1.0));
        registry.dispatch(0x7FFF, &TransactionValue::Empty);
        registry.dispatch(0x8000, &TransactionValue::Empty);

        assert_eq!(signals.load(Ordering::SeqCst), 2);
        assert_eq!(unsolicited.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_dispatch() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.add_signal(Arc::new(|_: u16, _: &TransactionValue| panic!("listener failure")));
        let h = hits.clone();
        registry.add_signal(Arc::new(move |_: u16, _: &TransactionValue| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(0x0003, &TransactionValue::Float(0.0));
        registry.dispatch(0x0003, &TransactionValue::Float(0.0));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    fn counting(hits: &Arc<AtomicUsize>) -> FrameCallback {
        let h = hits.clone();
        Arc::new(move |_: u16, _: &TransactionValue| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_registration_appends_duplicates() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let callback = counting(&hits);
        registry.add_unsolicited(callback.clone());
        registry.add_unsolicited(callback);

        registry.dispatch(0x0010, &TransactionValue::Empty);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deduplicated_registry_keeps_one_copy() {
        let registry = CallbackRegistry::deduplicated();
        let hits = Arc::new(AtomicUsize::new(0));
        let callback = counting(&hits);
        registry.add_signal(callback.clone());
        registry.add_signal(callback);
        registry.add_signal(counting(&hits));

        registry.dispatch(0x0002, &TransactionValue::Float(0.5));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
