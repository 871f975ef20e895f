#![allow(dead_code)]

use deskctl::protocol::encode_frame;
use deskctl::transport::{Transport, TransportError, TransportEvent};
use deskctl::{Desk, Rearm};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    open_error: Option<String>,
    opens: u32,
    sent: Vec<Vec<u8>>,
}

/// In-memory transport that records every write.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    link: Arc<Mutex<LinkState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let transport = Self::default();
        transport.link.lock().unwrap().open_error = Some(message.to_string());
        transport
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.link.lock().unwrap().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.link.lock().unwrap().sent)
    }

    pub fn opens(&self) -> u32 {
        self.link.lock().unwrap().opens
    }

    /// Simulate the cable being pulled without telling the desk.
    pub fn drop_link(&self) {
        self.link.lock().unwrap().connected = false;
    }
}

impl Transport for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.link.lock().unwrap().connected
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let mut link = self.link.lock().unwrap();
        link.opens += 1;
        if let Some(message) = &link.open_error {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                message.clone(),
            )));
        }
        link.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.link.lock().unwrap().connected = false;
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut link = self.link.lock().unwrap();
        if link.connected {
            link.sent.push(bytes.to_vec());
        }
        Ok(())
    }
}

/// Push one framed code through the desk's decoder, returning the last decision.
pub fn feed_code(desk: &mut Desk<RecordingTransport>, code: u16) -> Rearm {
    let mut rearm = Rearm::Keep;
    for byte in encode_frame(code) {
        rearm = desk.on_byte(byte);
    }
    rearm
}

pub async fn send_code(events: &mpsc::Sender<TransportEvent>, code: u16) {
    for byte in encode_frame(code) {
        events.send(TransportEvent::ByteReceived(byte)).await.unwrap();
    }
}

pub fn press(bit: u8) -> Vec<u8> {
    vec![0xff, bit, bit]
}
