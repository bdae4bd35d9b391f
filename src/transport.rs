// Byte-stream transports underneath a motor connection
//
// `SerialPortTransport` talks to real hardware through the serialport crate.
// `MemoryTransport` is an in-memory device stand-in: bytes written by the host
// are handed to a responder closure whose output is queued for the host to read.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serialport::SerialPort;
use tracing::debug;

use crate::config::READ_TIMEOUT;

/// Duplex byte stream used by the connection engine
///
/// `read` must not block indefinitely: returning `Ok(0)` or a `TimedOut` error
/// when nothing is available is expected.
pub trait Transport: Send {
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn name(&self) -> &str;
}

/// Serial port transport
pub struct SerialPortTransport {
    path: String,
    baudrate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortTransport {
    /// Create a transport; the port is opened on `open()`
    pub fn new(path: &str, baudrate: u32) -> Self {
        Self {
            path: path.to_string(),
            baudrate,
            port: None,
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl Transport for SerialPortTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.path, self.baudrate)
            .timeout(READ_TIMEOUT)
            .open()?;
        debug!("Opened serial port {} at {} baud", self.path, self.baudrate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port()?.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port()?.flush()
    }

    fn name(&self) -> &str {
        &self.path
    }
}

/// Device-side responder: receives each chunk the host writes, returns byte chunks to send back
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct MemoryDevice {
    to_host: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
}

/// Handle to the device end of a `MemoryTransport`
#[derive(Clone, Default)]
pub struct MemoryDeviceHandle {
    device: Arc<Mutex<MemoryDevice>>,
}

impl MemoryDeviceHandle {
    /// Queue bytes for the host to read (e.g. unsolicited telemetry)
    pub fn push(&self, bytes: &[u8]) {
        self.device.lock().to_host.extend(bytes);
    }

    pub fn set_responder(&self, responder: Responder) {
        self.device.lock().responder = Some(responder);
    }

    /// Every chunk the host has written, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.device.lock().written.clone()
    }
}

/// In-memory transport backed by a scripted device
pub struct MemoryTransport {
    name: String,
    open: bool,
    device: MemoryDeviceHandle,
}

impl MemoryTransport {
    pub fn new(name: &str) -> (Self, MemoryDeviceHandle) {
        let device = MemoryDeviceHandle::default();
        let transport = Self {
            name: name.to_string(),
            open: false,
            device: device.clone(),
        };
        (transport, device)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed"));
        }
        let mut device = self.device.device.lock();
        let n = buf.len().min(device.to_host.len());
        for (slot, byte) in buf.iter_mut().zip(device.to_host.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed"));
        }
        let mut device = self.device.device.lock();
        device.written.push(bytes.to_vec());
        let replies = match device.responder.as_mut() {
            Some(responder) => responder(bytes),
            None => Vec::new(),
        };
        for reply in replies {
            device.to_host.extend(reply);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
