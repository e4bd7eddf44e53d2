//! HDLC serial service.
//!
//! Mirrors the RPC surface over a byte-oriented link: inbound frames are
//! deframed, CRC-checked, unescaped and decoded into [`Packet`]s;
//! configuration and transmit requests are dispatched to the radio
//! service. Received mesh frames flow the other way through
//! [`SerialRadioListener`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::hdlc::{self, HdlcProcessor, MAX_HDLC_SIZE};
use crate::mesh::{Frame, NetworkReceiver};
use crate::wire::{Packet, ReceiveResponse, WireFrame};
use crate::{Error, Result};

use super::RadioService;

/// Poll window of one serial read.
const RX_TIMEOUT: Duration = Duration::from_millis(100);

/// A byte-oriented, internally synchronized serial link.
///
/// Methods take `&self` so the RX thread and the listener can share one
/// port; implementations are expected to allow concurrent read and write
/// (a tty fd does).
pub trait SerialPort: Send + Sync {
    /// Waits up to `timeout` for one byte. `Ok(None)` on an empty window.
    fn read_byte(&self, timeout: Duration) -> Result<Option<u8>>;

    fn write_all(&self, data: &[u8]) -> Result<()>;
}

/// Forwards received mesh frames to the serial client, HDLC-framed.
pub struct SerialRadioListener {
    port: Arc<dyn SerialPort>,
}

impl NetworkReceiver for SerialRadioListener {
    fn on_receive(&self, frame: &Frame) {
        let packet = Packet::Receive(ReceiveResponse {
            frame: WireFrame::pack(&frame.buffer),
        });
        let framed = hdlc::frame(&packet.encode());
        if self.port.write_all(&framed).is_err() {
            error!("serial: problem occurred while writing to the port");
        }
    }
}

/// Serial-side request handling: owns the RX thread.
pub struct SerialService {
    port: Arc<dyn SerialPort>,
    service: Arc<RadioService>,
    active: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl SerialService {
    pub fn new(port: Arc<dyn SerialPort>, service: Arc<RadioService>) -> Self {
        SerialService {
            port,
            service,
            active: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
        }
    }

    /// The listener to attach to the radio service's broadcasters.
    pub fn listener(&self) -> Arc<SerialRadioListener> {
        Arc::new(SerialRadioListener {
            port: self.port.clone(),
        })
    }

    /// Starts monitoring the port for client requests.
    pub fn start(&mut self) -> Result<()> {
        if self.active.load(Ordering::SeqCst) {
            return Err(Error::PreconditionFailed);
        }
        self.active.store(true, Ordering::SeqCst);

        let port = self.port.clone();
        let service = self.service.clone();
        let active = self.active.clone();
        self.rx_thread = Some(thread::spawn(move || {
            info!("serial: rx thread started");
            rx_loop(port, service, active);
            info!("serial: rx thread stopped");
        }));

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(Error::PreconditionFailed);
        }
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.rx_thread.take() {
            if handle.join().is_err() {
                error!("serial: rx thread panicked");
                return Err(Error::Fail);
            }
        }
        Ok(())
    }
}

impl Drop for SerialService {
    fn drop(&mut self) {
        if self.active.load(Ordering::SeqCst) {
            let _ = self.stop();
        }
    }
}

fn rx_loop(port: Arc<dyn SerialPort>, service: Arc<RadioService>, active: Arc<AtomicBool>) {
    let mut processor = HdlcProcessor::new(MAX_HDLC_SIZE);

    while active.load(Ordering::SeqCst) {
        let byte = match port.read_byte(RX_TIMEOUT) {
            Ok(Some(byte)) => byte,
            Ok(None) => continue,
            Err(err) => {
                error!("serial: unable to read data: {}", err);
                continue;
            }
        };

        let Some(raw_frame) = processor.push(byte) else {
            continue;
        };

        // The CRC of the pre-escape payload follows the closing flag.
        let Some(expected_crc) = read_crc(&port) else {
            warn!("serial: frame dropped, crc missing");
            continue;
        };

        let payload = hdlc::unescape(&raw_frame);
        let actual_crc = hdlc::crc32(&payload);
        if expected_crc != actual_crc {
            warn!(
                "serial: frame dropped, crc mismatch (expected {:08x}, got {:08x})",
                expected_crc, actual_crc
            );
            continue;
        }

        handle_packet(&service, Packet::decode(&payload));
    }
}

fn read_crc(port: &Arc<dyn SerialPort>) -> Option<u32> {
    let mut bytes = [0u8; 4];
    for byte in &mut bytes {
        match port.read_byte(RX_TIMEOUT) {
            Ok(Some(b)) => *byte = b,
            _ => return None,
        }
    }
    Some(u32::from_le_bytes(bytes))
}

fn handle_packet(service: &RadioService, packet: Packet) {
    match packet {
        Packet::Config(request) => {
            if let Err(err) = service.configure(request.module, &request.radio_config()) {
                warn!("serial: unable to configure the radio: {}", err);
            }
        }
        Packet::Transmit(request) => {
            let frame = Frame::new(request.frame.unpack());
            if let Err(err) = service.transmit(request.module, &frame) {
                warn!("serial: unable to transmit to the radio: {}", err);
            }
        }
        Packet::Receive(_) | Packet::Unknown => {
            warn!("serial: dropped packet with unexpected type");
        }
    }
}
