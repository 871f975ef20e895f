use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial port is not open")]
    NotConnected,
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Events pushed by a transport into the desk's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged { is_open: bool, error: Option<String> },
    ByteReceived(u8),
}

/// Byte link to the motor controller.
///
/// The outcome of `open` is reported through its return value. Changes the
/// transport notices on its own afterwards (read failures, device removal)
/// and inbound bytes arrive as [`TransportEvent`]s.
pub trait Transport {
    fn is_connected(&self) -> bool;
    fn open(&mut self) -> Result<(), TransportError>;
    fn close(&mut self);
    /// Fire-and-forget write. Sending while closed is silently skipped.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Serial link at 9600 baud, 8N1, no flow control.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    events: mpsc::Sender<TransportEvent>,
    port: Option<Box<dyn SerialPort>>,
    connected: Arc<AtomicBool>,
    stop_reader: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            events,
            port: None,
            connected: Arc::new(AtomicBool::new(false)),
            stop_reader: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn spawn_reader(&self, mut reader: Box<dyn SerialPort>) -> Result<(), TransportError> {
        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        let stop = Arc::clone(&self.stop_reader);
        let path = self.path.clone();

        thread::Builder::new()
            .name(format!("serial-rx {}", path))
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK];
                while !stop.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(n) => {
                            for &byte in &buf[..n] {
                                if events.blocking_send(TransportEvent::ByteReceived(byte)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            if stop.load(Ordering::Acquire) {
                                return;
                            }
                            connected.store(false, Ordering::Release);
                            // A vanished device is a plain close, anything else is a failure
                            let message = match e.kind() {
                                ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
                                    warn!("serial device {} was removed", path);
                                    None
                                }
                                _ => {
                                    error!("serial read on {} failed: {}", path, e);
                                    Some(e.to_string())
                                }
                            };
                            let _ = events.blocking_send(TransportEvent::ConnectionStateChanged {
                                is_open: false,
                                error: message,
                            });
                            return;
                        }
                    }
                }
                debug!("serial reader for {} stopped", path);
            })?;

        Ok(())
    }
}

impl Transport for SerialTransport {
    fn is_connected(&self) -> bool {
        self.port.is_some() && self.connected.load(Ordering::Acquire)
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }
        self.close();

        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Open {
                path: self.path.clone(),
                source,
            })?;
        let reader = port.try_clone().map_err(|source| TransportError::Open {
            path: self.path.clone(),
            source,
        })?;

        // Fresh flag per connection so a lingering reader cannot outlive close()
        self.stop_reader = Arc::new(AtomicBool::new(false));
        self.spawn_reader(reader)?;
        self.port = Some(port);
        self.connected.store(true, Ordering::Release);

        info!("opened {} @ {} baud", self.path, self.baud_rate);
        Ok(())
    }

    fn close(&mut self) {
        self.stop_reader.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        if self.port.take().is_some() {
            info!("closed {}", self.path);
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Ok(());
        }
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_transport_drops_sends() {
        let (tx, _rx) = mpsc::channel(4);
        let mut transport = SerialTransport::new("/dev/null-desk", DEFAULT_BAUD_RATE, tx);
        assert!(!transport.is_connected());
        assert!(transport.send(&[0x77]).is_ok());
        transport.close();
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_open_missing_device_reports_path() {
        let (tx, _rx) = mpsc::channel(4);
        let mut transport = SerialTransport::new("/dev/does-not-exist-desk", DEFAULT_BAUD_RATE, tx);
        let err = transport.open().unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(err.to_string().contains("/dev/does-not-exist-desk"));
        assert!(!transport.is_connected());
    }
}
