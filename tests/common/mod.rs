// Scripted KevinbotMC device behind a MemoryTransport

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use kevinbot_mc::connection::SerialConnection;
use kevinbot_mc::motor::words;
use kevinbot_mc::protocol::frame::{decode_request, encode_response};
use kevinbot_mc::protocol::{StatusCode, TransactionValue};
use kevinbot_mc::transport::{MemoryDeviceHandle, MemoryTransport};

/// Every request the fake device has answered, with its arrival time
pub type RequestLog = Arc<Mutex<Vec<(u16, Instant)>>>;

pub struct FakeMotor {
    pub name: &'static str,
    pub firmware: &'static str,
    pub watchdog_ms: u64,
}

impl FakeMotor {
    pub fn new(name: &'static str, firmware: &'static str, watchdog_ms: u64) -> Self {
        Self {
            name,
            firmware,
            watchdog_ms,
        }
    }

    fn answer(&self, control_word: u16, value: TransactionValue) -> TransactionValue {
        match control_word {
            words::NAME => TransactionValue::String(self.name.to_string()),
            words::FIRMWARE_VERSION => TransactionValue::String(self.firmware.to_string()),
            words::WATCHDOG_INTERVAL => TransactionValue::UnsignedInt {
                value: self.watchdog_ms,
                size: 2,
            },
            words::ENABLE | words::TARGET | words::MODE => value,
            _ => TransactionValue::Empty,
        }
    }

    /// Serial connection wired to this device
    pub fn connect(self) -> (SerialConnection, MemoryDeviceHandle, RequestLog) {
        let (transport, device) = MemoryTransport::new("fake-motor");
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));

        let requests = log.clone();
        device.set_responder(Box::new(move |bytes: &[u8]| -> Vec<Vec<u8>> {
            let Some(request) = decode_request(bytes) else {
                return Vec::new();
            };
            requests.lock().push((request.control_word, Instant::now()));
            let value = request.value().unwrap_or(TransactionValue::Empty);
            let reply = self.answer(request.control_word, value);
            match encode_response(StatusCode::Ok, request.control_word, &reply, request.uid) {
                Ok(frame) => vec![frame],
                Err(_) => Vec::new(),
            }
        }));

        let connection = SerialConnection::with_transport(Box::new(transport))
            .with_retry_policy(1, Duration::from_millis(200));
        (connection, device, log)
    }
}

/// Control words in the log, excluding watchdog feeds
pub fn command_words(log: &RequestLog) -> Vec<u16> {
    log.lock()
        .iter()
        .map(|(word, _)| *word)
        .filter(|word| *word != words::WATCHDOG_FEED)
        .collect()
}

/// Poll `condition` until it holds or `timeout` expires
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
