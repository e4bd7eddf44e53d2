//! The mesh MAC state machine.
//!
//! The MAC is cooperative: it owns no thread and no timer. Each call to
//! [`Network::update`] performs at most one receive poll and at most one
//! transmission (a beacon or one fragment of the pending payload), then
//! returns. The per-frontend update thread calls it in a tight loop;
//! between calls the whole MAC is just data.
//!
//! Transmission is slotted. Every node derives its slot from its rank
//! among the ids it currently knows (its own plus the live peer table), so
//! nodes that hear each other's beacons converge on disjoint send windows
//! without any negotiation.

use core::cmp;
use core::mem;
use std::sync::Arc;

use log::{debug, trace};

use crate::time::{Clock, SystemClock, Timestamp};
use crate::{Error, Result};

use super::interface::NetworkInterface;
use super::packet::{Packet, DATA_HEADER_LEN, MAX_FRAGMENT_PAYLOAD, MAX_FRAME_LEN};
use super::peers::{peer_flags, PeerTable};
use super::receiver::NetworkReceiver;
use super::{Frame, MeshConfig, NodeId, Stats};

/// A peer is considered gone after this many missed beacons.
const PEER_TTL_BEACONS: u64 = 4;

/// Smoothing window for the rate statistics.
const RATE_WINDOW_MILLIS: u64 = 1000;

const AIR_BUF_LEN: usize = DATA_HEADER_LEN + MAX_FRAGMENT_PAYLOAD;

/// Seam between the per-frontend runtime and a MAC implementation.
///
/// [`Network`] is the real one; test suites substitute fakes to exercise
/// the runtime without a radio.
pub trait MeshMac: Send {
    /// Advances the state machine by one cooperative step.
    fn update(&mut self);

    /// Queues one payload for transmission.
    ///
    /// Fails with [`Error::NotReady`] while a previous payload is still
    /// draining and with [`Error::InvalidArg`] for empty or oversized
    /// payloads.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Whether [`MeshMac::send`] would currently accept a payload.
    fn is_tx_free(&self) -> bool;

    fn stats(&self) -> Stats;
}

struct PendingTx {
    data: Vec<u8>,
    seq: u16,
    frag_index: u16,
    frag_count: u16,
}

struct Assembly {
    src: NodeId,
    seq: u16,
    frag_count: u16,
    next: u16,
    buf: Vec<u8>,
}

#[derive(Default)]
struct RateWindow {
    started: Option<Timestamp>,
    tx_bytes: u64,
    rx_bytes: u64,
}

/// The mesh MAC bound to one network interface.
pub struct Network<I: NetworkInterface> {
    pattern: u16,
    slot_millis: u64,
    gap_millis: u64,
    beacon_millis: u64,

    iface: I,
    receiver: Arc<dyn NetworkReceiver>,
    clock: Box<dyn Clock>,

    node_id: NodeId,
    peers: PeerTable,

    tx: Option<PendingTx>,
    next_seq: u16,
    rx: Option<Assembly>,
    last_beacon: Option<Timestamp>,

    air_buf: Vec<u8>,
    stats: Stats,
    window: RateWindow,
}

impl<I: NetworkInterface> Network<I> {
    /// Creates a MAC driven by the system clock.
    ///
    /// Fails with [`Error::InvalidArg`] when the configuration is unusable
    /// (zero slot or beacon interval).
    pub fn new(
        config: &MeshConfig,
        iface: I,
        receiver: Arc<dyn NetworkReceiver>,
        node_id: NodeId,
    ) -> Result<Self> {
        Self::with_clock(config, iface, receiver, node_id, Box::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: &MeshConfig,
        iface: I,
        receiver: Arc<dyn NetworkReceiver>,
        node_id: NodeId,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let slot_millis = config.slot_duration.as_millis() as u64;
        let beacon_millis = config.beacon_interval.as_millis() as u64;
        if slot_millis == 0 || beacon_millis == 0 {
            return Err(Error::InvalidArg);
        }

        Ok(Network {
            pattern: config.packet_pattern,
            slot_millis,
            gap_millis: config.gap_duration.as_millis() as u64,
            beacon_millis,
            iface,
            receiver,
            clock,
            node_id,
            peers: PeerTable::new(),
            tx: None,
            next_seq: 0,
            rx: None,
            last_beacon: None,
            air_buf: vec![0; AIR_BUF_LEN],
            stats: Stats::default(),
            window: RateWindow::default(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn poll_rx(&mut self, now: Timestamp) {
        let mut buf = mem::take(&mut self.air_buf);

        match self.iface.receive(&mut buf) {
            Ok(len) => {
                self.window.rx_bytes += len as u64;
                match Packet::decode(self.pattern, &buf[..len]) {
                    Ok(Packet::Beacon { src }) => {
                        if src != self.node_id {
                            self.peers.refresh(src, now, peer_flags::BEACON);
                        }
                    }
                    Ok(Packet::Data {
                        src,
                        seq,
                        frag_index,
                        frag_count,
                        payload,
                    }) => self.handle_fragment(src, seq, frag_index, frag_count, payload, now),
                    Err(_) => trace!("mesh {}: dropping unsynced packet", self.node_id),
                }
            }
            Err(Error::Timeout) => {}
            Err(err) => trace!("mesh {}: rx error, will retry: {}", self.node_id, err),
        }

        self.air_buf = buf;
    }

    fn handle_fragment(
        &mut self,
        src: NodeId,
        seq: u16,
        frag_index: u16,
        frag_count: u16,
        payload: &[u8],
        now: Timestamp,
    ) {
        if src == self.node_id {
            return;
        }
        if frag_count == 0 || usize::from(frag_count) * MAX_FRAGMENT_PAYLOAD > MAX_FRAME_LEN {
            trace!("mesh {}: dropping fragment with bad count", self.node_id);
            return;
        }

        // Data traffic proves liveness just like a beacon does.
        self.peers.refresh(src, now, peer_flags::DATA);

        if frag_index == 0 {
            self.rx = Some(Assembly {
                src,
                seq,
                frag_count,
                next: 0,
                buf: Vec::with_capacity(usize::from(frag_count) * MAX_FRAGMENT_PAYLOAD),
            });
        }

        let Some(assembly) = &mut self.rx else {
            return;
        };
        if assembly.src != src || assembly.seq != seq || assembly.next != frag_index {
            trace!("mesh {}: fragment stream desync, dropping assembly", self.node_id);
            self.rx = None;
            return;
        }

        assembly.buf.extend_from_slice(payload);
        assembly.next += 1;

        if assembly.next == assembly.frag_count {
            if let Some(assembly) = self.rx.take() {
                debug!(
                    "mesh {}: received {} byte frame from {}",
                    self.node_id,
                    assembly.buf.len(),
                    src
                );
                self.stats.rx_counter += 1;
                let frame = Frame::new(assembly.buf);
                self.receiver.on_receive(&frame);
            }
        }
    }

    fn beacon_due(&self, now: Timestamp) -> bool {
        self.last_beacon
            .map_or(true, |t| now.millis_since(t) >= self.beacon_millis)
    }

    fn send_beacon(&mut self, now: Timestamp) {
        let mut buf = mem::take(&mut self.air_buf);

        let packet = Packet::Beacon { src: self.node_id };
        let sent = packet
            .encode(self.pattern, &mut buf)
            .and_then(|len| self.iface.transmit(&buf[..len]).map(|_| len));

        match sent {
            Ok(len) => {
                self.window.tx_bytes += len as u64;
                self.last_beacon = Some(now);
            }
            Err(err) => trace!("mesh {}: beacon deferred: {}", self.node_id, err),
        }

        self.air_buf = buf;
    }

    /// Whether this node's send slot is open at `now`.
    ///
    /// Slot ownership: sort the locally known ids (self plus live peers);
    /// this node's rank picks its slot within a cycle of
    /// `count * (slot + gap)`.
    fn slot_open(&self, now: Timestamp) -> bool {
        let period = self.slot_millis + self.gap_millis;
        let count = self.peers.len() as u64 + 1;
        let cycle = count * period;

        let rank = self
            .peers
            .iter()
            .filter(|p| p.id < self.node_id)
            .count() as u64;

        let offset = now.as_millis() % cycle;
        let start = rank * period;
        offset >= start && offset < start + self.slot_millis
    }

    fn send_fragment(&mut self) {
        let mut buf = mem::take(&mut self.air_buf);

        let sent = if let Some(tx) = &self.tx {
            let start = usize::from(tx.frag_index) * MAX_FRAGMENT_PAYLOAD;
            let end = cmp::min(start + MAX_FRAGMENT_PAYLOAD, tx.data.len());
            let packet = Packet::Data {
                src: self.node_id,
                seq: tx.seq,
                frag_index: tx.frag_index,
                frag_count: tx.frag_count,
                payload: &tx.data[start..end],
            };
            packet.encode(self.pattern, &mut buf)
        } else {
            self.air_buf = buf;
            return;
        };

        let sent = sent.and_then(|len| self.iface.transmit(&buf[..len]).map(|_| len));
        self.air_buf = buf;

        match sent {
            Ok(len) => {
                self.window.tx_bytes += len as u64;
                if let Some(tx) = &mut self.tx {
                    tx.frag_index += 1;
                    if tx.frag_index == tx.frag_count {
                        debug!(
                            "mesh {}: payload of {} fragments sent",
                            self.node_id, tx.frag_count
                        );
                        self.tx = None;
                        self.stats.tx_counter += 1;
                    }
                }
            }
            Err(err) => trace!("mesh {}: fragment deferred: {}", self.node_id, err),
        }
    }

    fn update_rates(&mut self, now: Timestamp) {
        let Some(started) = self.window.started else {
            self.window.started = Some(now);
            return;
        };

        let elapsed = now.millis_since(started);
        if elapsed >= RATE_WINDOW_MILLIS {
            self.stats.tx_speed = self.window.tx_bytes * 1000 / elapsed;
            self.stats.rx_speed = self.window.rx_bytes * 1000 / elapsed;
            self.window = RateWindow {
                started: Some(now),
                ..RateWindow::default()
            };
        }
    }
}

impl<I: NetworkInterface> MeshMac for Network<I> {
    fn update(&mut self) {
        let now = self.clock.now();

        self.poll_rx(now);
        self.peers.purge(now, PEER_TTL_BEACONS * self.beacon_millis);
        self.update_rates(now);

        // At most one transmission per update; beacons take precedence so
        // long data bursts cannot starve peer discovery.
        if self.beacon_due(now) {
            self.send_beacon(now);
        } else if self.tx.is_some() && self.slot_open(now) {
            self.send_fragment();
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > MAX_FRAME_LEN {
            return Err(Error::InvalidArg);
        }
        if self.tx.is_some() {
            return Err(Error::NotReady);
        }

        self.next_seq = self.next_seq.wrapping_add(1);
        let frag_count = data.len().div_ceil(MAX_FRAGMENT_PAYLOAD) as u16;
        self.tx = Some(PendingTx {
            data: data.to_vec(),
            seq: self.next_seq,
            frag_index: 0,
            frag_count,
        });
        Ok(())
    }

    fn is_tx_free(&self) -> bool {
        self.tx.is_none()
    }

    fn stats(&self) -> Stats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ManualClock(Arc<AtomicU64>);

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            Timestamp::from_millis(self.0.load(Ordering::SeqCst))
        }
    }

    /// Interface backed by in-memory queues.
    #[derive(Default)]
    struct FakeInterface {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    impl NetworkInterface for FakeInterface {
        fn transmit(&mut self, data: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.inbound.lock().unwrap().pop_front() {
                Some(packet) => {
                    buf[..packet.len()].copy_from_slice(&packet);
                    Ok(packet.len())
                }
                None => Err(Error::Timeout),
            }
        }
    }

    #[derive(Default)]
    struct Sink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl NetworkReceiver for Sink {
        fn on_receive(&self, frame: &Frame) {
            self.frames.lock().unwrap().push(frame.buffer.clone());
        }
    }

    struct Harness {
        mac: Network<FakeInterface>,
        time: Arc<AtomicU64>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sink: Arc<Sink>,
    }

    fn harness(config: &MeshConfig, id: u64) -> Harness {
        let iface = FakeInterface::default();
        let sent = iface.sent.clone();
        let inbound = iface.inbound.clone();
        let sink = Arc::new(Sink::default());
        let time = Arc::new(AtomicU64::new(0));
        let receiver: Arc<dyn NetworkReceiver> = sink.clone();
        let mac = Network::with_clock(
            config,
            iface,
            receiver,
            NodeId::new(id),
            Box::new(ManualClock(time.clone())),
        )
        .unwrap();
        Harness {
            mac,
            time,
            sent,
            inbound,
            sink,
        }
    }

    fn config() -> MeshConfig {
        MeshConfig {
            packet_pattern: 0x77,
            slot_duration: Duration::from_millis(50),
            gap_duration: Duration::from_millis(5),
            beacon_interval: Duration::from_millis(100),
            base_id: 0,
        }
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut bad = config();
        bad.slot_duration = Duration::ZERO;
        let iface = FakeInterface::default();
        let sink: Arc<dyn NetworkReceiver> = Arc::new(Sink::default());
        assert!(Network::new(&bad, iface, sink, NodeId::new(1)).is_err());
    }

    #[test]
    fn beacons_follow_the_interval() {
        let mut h = harness(&config(), 1);

        h.mac.update();
        assert_eq!(h.sent.lock().unwrap().len(), 1, "first update beacons");

        h.time.store(50, Ordering::SeqCst);
        h.mac.update();
        assert_eq!(h.sent.lock().unwrap().len(), 1, "interval not yet over");

        h.time.store(100, Ordering::SeqCst);
        h.mac.update();
        assert_eq!(h.sent.lock().unwrap().len(), 2);

        let beacon = h.sent.lock().unwrap()[0].clone();
        assert_eq!(
            Packet::decode(0x77, &beacon).unwrap(),
            Packet::Beacon { src: NodeId::new(1) }
        );
    }

    #[test]
    fn payload_is_fragmented_and_drained() {
        let mut h = harness(&config(), 1);

        let payload: Vec<u8> = (0..2500).map(|i| i as u8).collect();
        h.mac.send(&payload).unwrap();
        assert!(!h.mac.is_tx_free());
        assert_eq!(h.mac.send(&payload), Err(Error::NotReady));

        // First update emits the beacon, the following ones the fragments.
        for _ in 0..8 {
            h.mac.update();
        }
        assert!(h.mac.is_tx_free());

        let sent = h.sent.lock().unwrap();
        let fragments: Vec<_> = sent
            .iter()
            .filter_map(|raw| match Packet::decode(0x77, raw) {
                Ok(Packet::Data {
                    frag_index,
                    frag_count,
                    payload,
                    ..
                }) => Some((frag_index, frag_count, payload.to_vec())),
                _ => None,
            })
            .collect();

        assert_eq!(fragments.len(), 3);
        let mut joined = Vec::new();
        for (i, (frag_index, frag_count, data)) in fragments.iter().enumerate() {
            assert_eq!(usize::from(*frag_index), i);
            assert_eq!(*frag_count, 3);
            joined.extend_from_slice(data);
        }
        assert_eq!(joined, payload);
        assert_eq!(h.mac.stats().tx_counter, 1);
    }

    #[test]
    fn fragments_reassemble_into_one_frame() {
        let mut h = harness(&config(), 1);

        let payload: Vec<u8> = (0..2100).map(|i| (i * 7) as u8).collect();
        let src = NodeId::new(9);
        let mut packets = Vec::new();
        for (i, chunk) in payload.chunks(MAX_FRAGMENT_PAYLOAD).enumerate() {
            let mut buf = vec![0u8; AIR_BUF_LEN];
            let len = Packet::Data {
                src,
                seq: 1,
                frag_index: i as u16,
                frag_count: 3,
                payload: chunk,
            }
            .encode(0x77, &mut buf)
            .unwrap();
            buf.truncate(len);
            packets.push(buf);
        }
        h.inbound.lock().unwrap().extend(packets);

        for _ in 0..4 {
            h.mac.update();
        }

        let frames = h.sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], payload);
        assert_eq!(h.mac.stats().rx_counter, 1);
        // The sender is now a known peer.
        assert_eq!(h.mac.peer_count(), 1);
    }

    #[test]
    fn desynced_fragment_drops_the_assembly() {
        let mut h = harness(&config(), 1);

        let mut first = vec![0u8; AIR_BUF_LEN];
        let len = Packet::Data {
            src: NodeId::new(9),
            seq: 1,
            frag_index: 0,
            frag_count: 3,
            payload: &[1, 2, 3],
        }
        .encode(0x77, &mut first)
        .unwrap();
        first.truncate(len);

        let mut skipped = vec![0u8; AIR_BUF_LEN];
        let len = Packet::Data {
            src: NodeId::new(9),
            seq: 1,
            frag_index: 2,
            frag_count: 3,
            payload: &[7, 8, 9],
        }
        .encode(0x77, &mut skipped)
        .unwrap();
        skipped.truncate(len);

        h.inbound.lock().unwrap().push_back(first);
        h.inbound.lock().unwrap().push_back(skipped);
        for _ in 0..3 {
            h.mac.update();
        }

        assert!(h.sink.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn beacons_refresh_the_peer_table() {
        let mut h = harness(&config(), 1);

        let mut beacon = vec![0u8; AIR_BUF_LEN];
        let len = Packet::Beacon { src: NodeId::new(5) }
            .encode(0x77, &mut beacon)
            .unwrap();
        beacon.truncate(len);
        h.inbound.lock().unwrap().push_back(beacon);

        h.mac.update();
        assert_eq!(h.mac.peer_count(), 1);

        // Four missed beacon intervals time the peer out.
        h.time.store(500, Ordering::SeqCst);
        h.mac.update();
        assert_eq!(h.mac.peer_count(), 0);
    }

    #[test]
    fn oversized_send_is_rejected() {
        let mut h = harness(&config(), 1);
        let too_big = vec![0u8; MAX_FRAME_LEN + 1];
        assert_eq!(h.mac.send(&too_big), Err(Error::InvalidArg));
        assert_eq!(h.mac.send(&[]), Err(Error::InvalidArg));
    }
}
