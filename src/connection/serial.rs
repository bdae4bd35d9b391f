// Serial transaction engine
//
// One reader thread turns raw bytes into frames. Responses are matched to the
// waiting caller by uid through a per-attempt channel; unsolicited frames go
// over a channel to a dispatcher thread that runs the registered callbacks.
// `execute()` must never be called from a callback: it would wait on the
// thread that is supposed to deliver its response.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::{CallbackRegistry, ConnectionError, FrameCallback, MotorConnection, UidGenerator};
use crate::config::{DEFAULT_RETRIES, DEFAULT_TIMEOUT, DISPATCH_POLL, IDLE_SLEEP, JOIN_TIMEOUT};
use crate::protocol::frame::{self, FrameParser, InboundFrame, ResponseFrame, UnsolicitedFrame};
use crate::protocol::{TransactionResult, TransactionValue};
use crate::transport::{SerialPortTransport, Transport};

const READ_CHUNK: usize = 256;

/// State shared between the caller, reader and dispatcher threads
struct Shared {
    running: AtomicBool,
    /// Wait slots: uid -> sender that releases the waiting caller
    pending: Mutex<HashMap<u16, Sender<ResponseFrame>>>,
    callbacks: CallbackRegistry,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn resolve(&self, response: ResponseFrame) {
        let uid = response.uid;
        match self.pending.lock().remove(&uid) {
            Some(slot) => {
                trace!("Matched response UID={}", uid);
                // The receiver may have given up already; nothing to do then
                let _ = slot.try_send(response);
            }
            None => debug!("Dropping response with no waiter, UID={}", uid),
        }
    }
}

/// Registration of one attempt's wait slot; deregisters on drop
struct WaitSlot<'a> {
    shared: &'a Shared,
    uid: u16,
}

impl<'a> WaitSlot<'a> {
    fn register(shared: &'a Shared, uid: u16) -> (Self, Receiver<ResponseFrame>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        shared.pending.lock().insert(uid, tx);
        (Self { shared, uid }, rx)
    }
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.uid);
    }
}

#[derive(Default)]
struct Workers {
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Transaction engine over a byte-stream transport
pub struct SerialConnection {
    name: String,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
    uids: UidGenerator,
    retries: u32,
    timeout: Duration,
}

impl SerialConnection {
    /// Connection over a serial port, opened on `start()`
    pub fn open(port: &str, baudrate: u32) -> Self {
        Self::with_transport(Box::new(SerialPortTransport::new(port, baudrate)))
    }

    /// Connection over any transport
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        let name = transport.name().to_string();
        Self {
            name,
            transport: Arc::new(Mutex::new(transport)),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                callbacks: CallbackRegistry::new(),
            }),
            workers: Mutex::new(Workers::default()),
            uids: UidGenerator::new(),
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the retry policy used by `execute()`
    pub fn with_retry_policy(mut self, retries: u32, timeout: Duration) -> Self {
        self.retries = retries;
        self.timeout = timeout;
        self
    }

    /// Number of attempts currently waiting for a response
    pub fn pending_transactions(&self) -> usize {
        self.shared.pending.lock().len()
    }

    fn write_frame(&self, frame: &[u8]) -> Result<(), ConnectionError> {
        let mut transport = self.transport.lock();
        if !transport.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        transport.write(frame)?;
        transport.flush()?;
        Ok(())
    }
}

impl MotorConnection for SerialConnection {
    fn start(&self) -> Result<(), ConnectionError> {
        {
            let mut transport = self.transport.lock();
            if !transport.is_open() {
                transport.open()?;
                info!("Opened motor connection {}", self.name);
            }
        }

        let mut workers = self.workers.lock();
        if workers
            .reader
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
        {
            return Ok(());
        }
        // A reader that died on a transport error leaves its dispatcher to exit
        // once the unsolicited channel disconnects
        workers.reader = None;
        workers.dispatcher = None;

        self.shared.running.store(true, Ordering::Release);
        let (unsolicited_tx, unsolicited_rx) = crossbeam_channel::unbounded();

        let shared = self.shared.clone();
        let transport = self.transport.clone();
        let port = self.name.clone();
        workers.reader = Some(
            thread::Builder::new()
                .name(format!("mc-reader-{}", self.name))
                .spawn(move || read_loop(transport, shared, unsolicited_tx, port))?,
        );

        let shared = self.shared.clone();
        let port = self.name.clone();
        workers.dispatcher = Some(
            thread::Builder::new()
                .name(format!("mc-dispatch-{}", self.name))
                .spawn(move || dispatch_loop(unsolicited_rx, shared, port))?,
        );

        Ok(())
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);

        let (reader, dispatcher) = {
            let mut workers = self.workers.lock();
            (workers.reader.take(), workers.dispatcher.take())
        };
        for handle in [reader, dispatcher].into_iter().flatten() {
            if let Err(e) = join_timeout(handle, JOIN_TIMEOUT) {
                warn!("Worker thread for {} did not stop cleanly: {}", self.name, e);
            }
        }

        let mut transport = self.transport.lock();
        if transport.is_open() {
            transport.close();
            info!("Closed motor connection {}", self.name);
        }
    }

    fn execute(
        &self,
        control_word: u16,
        value: &TransactionValue,
    ) -> Result<TransactionResult, ConnectionError> {
        self.execute_with(control_word, value, self.retries, self.timeout)
    }

    fn execute_with(
        &self,
        control_word: u16,
        value: &TransactionValue,
        retries: u32,
        timeout: Duration,
    ) -> Result<TransactionResult, ConnectionError> {
        // Fail fast on unencodable values, before any I/O
        let (tag, payload) = value.encode()?;

        for attempt in 1..=retries + 1 {
            let uid = self.uids.next();
            let request = frame::build_request(control_word, tag, &payload, uid)?;

            let (_slot, response_rx) = WaitSlot::register(&self.shared, uid);
            trace!("Sending UID={}: {:02X?}", uid, request);
            self.write_frame(&request)?;

            match response_rx.recv_timeout(timeout) {
                Ok(response) => return Ok(response.into_result()?),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Timeout on word 0x{:04X} UID={} attempt {}/{}",
                        control_word,
                        uid,
                        attempt,
                        retries + 1
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Wait slot for UID={} closed before a response arrived", uid);
                }
            }
        }

        Err(ConnectionError::Timeout {
            control_word,
            attempts: retries + 1,
        })
    }

    fn add_signal_callback(&self, callback: FrameCallback) {
        self.shared.callbacks.add_signal(callback);
    }

    fn add_unsolicited_callback(&self, callback: FrameCallback) {
        self.shared.callbacks.add_unsolicited(callback);
    }

    fn is_open(&self) -> bool {
        self.shared.is_running() && self.transport.lock().is_open()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        if self.shared.is_running() {
            self.stop();
        }
    }
}

fn read_loop(
    transport: Arc<Mutex<Box<dyn Transport>>>,
    shared: Arc<Shared>,
    unsolicited_tx: Sender<UnsolicitedFrame>,
    port: String,
) {
    info!("Serial read loop started for {}", port);
    let mut parser = FrameParser::new();
    let mut chunk = [0u8; READ_CHUNK];

    while shared.is_running() {
        let read = transport.lock().read(&mut chunk);
        match read {
            Ok(0) => thread::sleep(IDLE_SLEEP),
            Ok(n) => {
                parser.extend(&chunk[..n]);
                for frame in parser.drain_frames() {
                    match frame {
                        InboundFrame::Response(response) => shared.resolve(response),
                        InboundFrame::Unsolicited(unsolicited) => {
                            trace!("Queued unsolicited frame word=0x{:04X}", unsolicited.control_word);
                            if unsolicited_tx.send(unsolicited).is_err() {
                                warn!("Unsolicited dispatcher for {} is gone", port);
                            }
                        }
                    }
                }
            }
            Err(e) if is_transient(&e) => thread::sleep(IDLE_SLEEP),
            Err(e) => {
                error!(
                    "An error occurred while reading the motor serial port {}: {}",
                    port, e
                );
                shared.running.store(false, Ordering::Release);
            }
        }
    }

    debug!("Serial read loop stopped for {}", port);
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn dispatch_loop(unsolicited_rx: Receiver<UnsolicitedFrame>, shared: Arc<Shared>, port: String) {
    debug!("Unsolicited dispatcher started for {}", port);

    while shared.is_running() {
        match unsolicited_rx.recv_timeout(DISPATCH_POLL) {
            Ok(frame) => match frame.value() {
                Ok(value) => shared.callbacks.dispatch(frame.control_word, &value),
                Err(e) => warn!(
                    "Undecodable unsolicited frame word=0x{:04X}: {}",
                    frame.control_word, e
                ),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Unsolicited dispatcher stopped for {}", port);
}

/// Join a thread, giving up after `timeout`
fn join_timeout(handle: JoinHandle<()>, timeout: Duration) -> io::Result<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(handle.join());
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(io::Error::other("thread panicked")),
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "thread join timeout")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;
    use crate::protocol::frame::{decode_request, encode_response, encode_unsolicited};
    use crate::transport::MemoryTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn echo_connection() -> (SerialConnection, crate::transport::MemoryDeviceHandle) {
        let (transport, device) = MemoryTransport::new("mem0");
        device.set_responder(Box::new(|bytes: &[u8]| -> Vec<Vec<u8>> {
            let request = decode_request(bytes).expect("valid request");
            vec![
                encode_response(
                    StatusCode::Ok,
                    request.control_word,
                    &request.value().unwrap(),
                    request.uid,
                )
                .unwrap(),
            ]
        }));
        (SerialConnection::with_transport(Box::new(transport)), device)
    }

    #[test]
    fn test_execute_echo() {
        let (connection, _device) = echo_connection();
        connection.start().unwrap();

        let result = connection
            .execute(0x0005, &TransactionValue::Float(3.5))
            .unwrap();
        assert_eq!(result.control_word, 0x0005);
        assert_eq!(result.value, TransactionValue::Float(3.5));
        assert_eq!(result.status, StatusCode::Ok);
        assert_eq!(connection.pending_transactions(), 0);

        connection.stop();
        assert!(!connection.is_open());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (connection, _device) = echo_connection();
        connection.start().unwrap();
        connection.start().unwrap();
        assert!(connection.is_open());
        assert!(connection.workers.lock().reader.is_some());
        connection.stop();
    }

    #[test]
    fn test_execute_before_start_fails() {
        let (connection, _device) = echo_connection();
        let err = connection
            .execute(0x0003, &TransactionValue::Empty)
            .unwrap_err();
        assert!(matches!(err, ConnectionError::NotOpen));
        assert_eq!(connection.pending_transactions(), 0);
    }

    #[test]
    fn test_invalid_value_fails_before_io() {
        let (connection, device) = echo_connection();
        connection.start().unwrap();
        let bad = TransactionValue::UnsignedInt { value: 300, size: 1 };
        let err = connection.execute(0x0006, &bad).unwrap_err();
        assert!(matches!(err, ConnectionError::Codec(_)));
        assert!(device.written().is_empty());
        connection.stop();
    }

    #[test]
    fn test_timeout_exhausts_attempts() {
        let (transport, device) = MemoryTransport::new("silent");
        let connection = SerialConnection::with_transport(Box::new(transport));
        connection.start().unwrap();

        let started = Instant::now();
        let err = connection
            .execute_with(0x0003, &TransactionValue::Empty, 2, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Timeout {
                control_word: 0x0003,
                attempts: 3
            }
        ));
        assert!(started.elapsed() >= Duration::from_millis(60));

        let uids: Vec<u16> = device
            .written()
            .iter()
            .map(|bytes| decode_request(bytes).unwrap().uid)
            .collect();
        assert_eq!(uids.len(), 3);
        assert!(uids[0] != uids[1] && uids[1] != uids[2] && uids[0] != uids[2]);
        assert_eq!(connection.pending_transactions(), 0);
        connection.stop();
    }

    #[test]
    fn test_unsolicited_frames_reach_callbacks() {
        let (connection, device) = echo_connection();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        connection.add_signal_callback(Arc::new(move |word: u16, value: &TransactionValue| {
            assert_eq!(word, 0x0002);
            assert_eq!(value.as_f32(), Some(1.25));
            s.fetch_add(1, Ordering::SeqCst);
        }));
        connection.start().unwrap();

        device.push(&encode_unsolicited(0x0002, &TransactionValue::Float(1.25)).unwrap());

        let deadline = Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        connection.stop();
    }

    #[test]
    fn test_callback_registered_twice_runs_twice() {
        let (connection, device) = echo_connection();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let callback: FrameCallback = Arc::new(move |_: u16, _: &TransactionValue| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        connection.add_unsolicited_callback(callback.clone());
        connection.add_unsolicited_callback(callback);
        connection.start().unwrap();

        device.push(&encode_unsolicited(0x9000, &TransactionValue::Empty).unwrap());

        let deadline = Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        connection.stop();
    }
}
