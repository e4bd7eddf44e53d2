//! Streaming RPC service for application clients.
//!
//! The transport is a plain TCP stream carrying length-prefixed
//! [`wire::Packet`]s: every message is a little-endian `u32` byte count
//! followed by the encoded packet. Three operations are served:
//!
//! * `Configure` — a [`Packet::Config`]; answered with a one-byte status.
//! * `Transmit` — a [`Packet::Transmit`]; answered with a one-byte status.
//! * `ReceiveStream` — a [`Packet::Receive`] subscribes the connection;
//!   the server then streams one [`Packet::Receive`] per inbound mesh
//!   frame until the client disconnects or the daemon shuts down.
//!
//! Between the broadcaster (update thread) and the stream writers sits a
//! bounded queue of 64 frames with a drop-oldest overflow policy; a slow
//! client loses the oldest frames instead of back-pressuring the MAC.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::mesh::{Frame, NetworkReceiver};
use crate::wire::{Packet, ReceiveResponse, WireFrame};
use crate::{Error, Result};

use super::RadioService;

/// Default RPC bind address.
pub const DEFAULT_LISTEN_URL: &str = "0.0.0.0:8080";

/// Capacity of the receive queue between broadcaster and stream writers.
const QUEUE_CAPACITY: usize = 64;

/// How long a stream writer waits per wake before re-checking
/// cancellation.
const POP_TIMEOUT: Duration = Duration::from_millis(50);

/// Accept/read poll cadence while watching the shutdown flag.
const IO_POLL: Duration = Duration::from_millis(50);

/// Largest accepted request message; anything longer is a desynced or
/// hostile stream.
const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// One-byte status codes sent in response to `Configure` and `Transmit`.
fn status_byte(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(Error::Fail) => 1,
        Err(Error::InvalidArg) => 2,
        Err(Error::PreconditionFailed) => 3,
        Err(Error::Timeout) => 4,
        Err(Error::NotReady) => 5,
    }
}

/// Listener end of the receive stream: buffers broadcast frames for the
/// RPC writers.
pub struct RpcRadioListener {
    tx: Sender<Frame>,
    // Kept for the drop-oldest policy; competing with the stream writers
    // on overflow is harmless.
    rx: Receiver<Frame>,
}

/// Creates the listener and the matching consumer handle for stream
/// writers.
pub fn receive_channel() -> (Arc<RpcRadioListener>, Receiver<Frame>) {
    let (tx, rx) = bounded(QUEUE_CAPACITY);
    let listener = Arc::new(RpcRadioListener { tx, rx: rx.clone() });
    (listener, rx)
}

impl NetworkReceiver for RpcRadioListener {
    fn on_receive(&self, frame: &Frame) {
        if self.tx.is_full() {
            let _ = self.rx.try_recv();
            warn!("rpc: receive queue full, dropping oldest frame");
        }
        if self.tx.try_send(frame.clone()).is_err() {
            warn!("rpc: receive queue rejected frame");
        }
    }
}

/// The RPC server; one handler thread per connection.
pub struct RpcServer {
    service: Arc<RadioService>,
    frames: Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
}

impl RpcServer {
    pub fn new(
        service: Arc<RadioService>,
        frames: Receiver<Frame>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        RpcServer {
            service,
            frames,
            shutdown,
        }
    }

    /// Binds `listen_url` and serves until the shutdown flag is raised.
    pub fn serve(&self, listen_url: &str) -> Result<()> {
        let listener = TcpListener::bind(listen_url).map_err(|err| {
            error!("rpc: unable to bind {}: {}", listen_url, err);
            Error::Fail
        })?;
        info!("rpc: listening on {}", listen_url);
        self.serve_on(listener)
    }

    /// Serves on an already-bound listener.
    pub fn serve_on(&self, listener: TcpListener) -> Result<()> {
        listener.set_nonblocking(true).map_err(|_| Error::Fail)?;

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("rpc: client connected from {}", peer);
                    let service = self.service.clone();
                    let frames = self.frames.clone();
                    let shutdown = self.shutdown.clone();
                    thread::spawn(move || {
                        if let Err(err) = handle_client(stream, service, frames, shutdown) {
                            debug!("rpc: client session ended: {}", err);
                        }
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(IO_POLL);
                }
                Err(err) => {
                    error!("rpc: accept failed: {}", err);
                    thread::sleep(IO_POLL);
                }
            }
        }

        info!("rpc: server stopped");
        Ok(())
    }
}

fn write_message(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(payload)
}

/// Reads one length-prefixed message, polling the shutdown flag between
/// timeouts. `Ok(None)` means the peer closed or the daemon is shutting
/// down.
fn read_message(
    stream: &mut TcpStream,
    shutdown: &AtomicBool,
) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    if !read_exact_polling(stream, &mut header, shutdown)? {
        return Ok(None);
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "oversized rpc message",
        ));
    }

    let mut payload = vec![0u8; len];
    if !read_exact_polling(stream, &mut payload, shutdown)? {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_exact_polling(
    stream: &mut TcpStream,
    buf: &mut [u8],
    shutdown: &AtomicBool,
) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

fn handle_client(
    mut stream: TcpStream,
    service: Arc<RadioService>,
    frames: Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    stream.set_read_timeout(Some(IO_POLL))?;
    stream.set_nodelay(true).ok();

    while !shutdown.load(Ordering::SeqCst) {
        let Some(message) = read_message(&mut stream, &shutdown)? else {
            return Ok(());
        };

        match Packet::decode(&message) {
            Packet::Config(request) => {
                let result = service.configure(request.module, &request.radio_config());
                if let Err(err) = result {
                    warn!("rpc: configure failed: {}", err);
                }
                write_message(&mut stream, &[status_byte(result)])?;
            }
            Packet::Transmit(request) => {
                let frame = Frame::new(request.frame.unpack());
                let result = service.transmit(request.module, &frame);
                if let Err(err) = result {
                    warn!("rpc: transmit failed: {}", err);
                }
                write_message(&mut stream, &[status_byte(result)])?;
            }
            Packet::Receive(_) => {
                debug!("rpc: start receive stream");
                let result = stream_frames(&mut stream, &frames, &shutdown);
                debug!("rpc: stop receive stream");
                return result;
            }
            Packet::Unknown => {
                warn!("rpc: undecodable request");
                write_message(&mut stream, &[status_byte(Err(Error::InvalidArg))])?;
            }
        }
    }

    Ok(())
}

fn stream_frames(
    stream: &mut TcpStream,
    frames: &Receiver<Frame>,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    while !shutdown.load(Ordering::SeqCst) {
        match frames.recv_timeout(POP_TIMEOUT) {
            Ok(frame) => {
                let packet = Packet::Receive(ReceiveResponse {
                    frame: WireFrame::pack(&frame.buffer),
                });
                write_message(stream, &packet.encode())?;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshConfig, NodeId};
    use crate::radio::{OfdmConfig, PhyConfig, Radio, RadioConfig, RadioFrame};
    use crate::wire::{ConfigurationRequest, TransmitRequest};

    struct NullRadio;

    impl Radio for NullRadio {
        fn configure(&self, _config: &RadioConfig) -> Result<()> {
            Ok(())
        }

        fn transmit(&self, _frame: &RadioFrame) -> Result<()> {
            Ok(())
        }

        fn receive(&self, _frame: &mut RadioFrame, timeout: Duration) -> Result<()> {
            thread::sleep(timeout);
            Err(Error::Timeout)
        }
    }

    fn frame_with(bytes: &[u8]) -> Frame {
        Frame::new(bytes.to_vec())
    }

    #[test]
    fn queue_drops_the_oldest_frames() {
        let (listener, rx) = receive_channel();

        for i in 0..(QUEUE_CAPACITY + 6) {
            listener.on_receive(&frame_with(&[i as u8]));
        }

        let received: Vec<u8> = rx.try_iter().map(|f| f.buffer[0]).collect();
        assert_eq!(received.len(), QUEUE_CAPACITY);
        assert_eq!(received[0], 6);
        assert_eq!(*received.last().unwrap(), (QUEUE_CAPACITY + 5) as u8);
    }

    fn rpc_fixture() -> (std::net::SocketAddr, Arc<RpcRadioListener>, Arc<AtomicBool>) {
        let service = Arc::new(
            RadioService::new(
                &MeshConfig::default(),
                NodeId::new(1),
                vec![Arc::new(NullRadio)],
            )
            .unwrap(),
        );
        let (listener, frames) = receive_channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = tcp.local_addr().unwrap();
        let server = RpcServer::new(service, frames, shutdown.clone());
        thread::spawn(move || server.serve_on(tcp).unwrap());

        (addr, listener, shutdown)
    }

    fn send_request(stream: &mut TcpStream, packet: &Packet) {
        let encoded = packet.encode();
        stream
            .write_all(&(encoded.len() as u32).to_le_bytes())
            .unwrap();
        stream.write_all(&encoded).unwrap();
    }

    fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(header) as usize];
        stream.read_exact(&mut payload).unwrap();
        payload
    }

    #[test]
    fn requests_are_answered_with_status_codes() {
        let (addr, _listener, shutdown) = rpc_fixture();
        let mut stream = TcpStream::connect(addr).unwrap();

        // Valid module.
        send_request(
            &mut stream,
            &Packet::Config(ConfigurationRequest {
                module: 0,
                freq_khz: 869_535,
                channel: 1,
                channel_spacing_khz: 200,
                tx_power: 10,
                phy: PhyConfig::Ofdm(OfdmConfig { mcs: 6, opt: 0 }),
            }),
        );
        assert_eq!(read_reply(&mut stream), vec![0]);

        // Module out of range maps to the invalid-argument status.
        send_request(
            &mut stream,
            &Packet::Transmit(TransmitRequest {
                module: 9,
                frame: WireFrame::pack(&[1, 2, 3]),
            }),
        );
        assert_eq!(read_reply(&mut stream), vec![2]);

        shutdown.store(true, Ordering::SeqCst);
    }

    #[test]
    fn receive_stream_carries_broadcast_frames() {
        let (addr, listener, shutdown) = rpc_fixture();
        let mut stream = TcpStream::connect(addr).unwrap();

        send_request(&mut stream, &Packet::Receive(ReceiveResponse::default()));

        let payload: Vec<u8> = (1..=10).collect();
        listener.on_receive(&frame_with(&payload));

        let reply = read_reply(&mut stream);
        match Packet::decode(&reply) {
            Packet::Receive(resp) => assert_eq!(resp.frame.unpack(), payload),
            other => panic!("unexpected packet {:?}", other),
        }

        shutdown.store(true, Ordering::SeqCst);
    }
}
