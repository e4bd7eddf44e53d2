//! Beacon-based mesh MAC and the per-frontend runtime around it.
//!
//! The mesh is single-hop broadcast with peer bookkeeping: every node
//! periodically beacons its 64-bit id, tracks the peers it hears, and
//! serializes its transmissions into a time slot derived from its rank
//! among the known ids. Payloads larger than one air packet are fragmented
//! on the way out and reassembled on the way in; the `packet_pattern`
//! magic in every packet header doubles as the stream sync.
//!
//! The pieces compose leaf-first:
//!
//! * [`Network`] — the MAC state machine, advanced by repeated
//!   [`Network::update`] calls.
//! * [`RadioNetworkInterface`] — adapts the MAC's byte-level TX/RX to a
//!   [`Radio`](crate::radio::Radio)'s fixed-capacity frames.
//! * [`Broadcaster`] — fans a reassembled frame out to every attached
//!   listener.
//! * [`RadioNetwork`] — owns one radio plus one MAC and runs the update
//!   thread.

use core::fmt;
use std::time::Duration;

mod interface;
mod network;
mod packet;
mod peers;
mod radio_network;
mod receiver;

pub use self::interface::{NetworkInterface, RadioNetworkInterface};
pub use self::network::{MeshMac, Network};
pub use self::packet::{MAX_FRAGMENT_PAYLOAD, MAX_FRAME_LEN};
pub use self::peers::{peer_flags, Peer, PeerTable, PEER_TABLE_CAPACITY};
pub use self::radio_network::RadioNetwork;
pub use self::receiver::{Broadcaster, NetworkReceiver};

/// A variable-length mesh frame, the unit exchanged at the daemon's public
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub buffer: Vec<u8>,
}

impl Frame {
    pub fn new(buffer: Vec<u8>) -> Self {
        Frame { buffer }
    }
}

/// 64-bit mesh node identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Mesh MAC configuration, shared by all frontends of a gateway.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Magic pattern carried by every air packet; doubles as stream sync.
    pub packet_pattern: u16,
    /// Length of this node's send slot.
    pub slot_duration: Duration,
    /// Guard interval between adjacent slots.
    pub gap_duration: Duration,
    /// Beacon cadence. Peers expire after several missed beacons.
    pub beacon_interval: Duration,
    /// Base value folded into the generated node id.
    pub base_id: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            packet_pattern: 0x77,
            slot_duration: Duration::from_millis(50),
            gap_duration: Duration::from_millis(5),
            beacon_interval: Duration::from_millis(100),
            base_id: 0,
        }
    }
}

/// Traffic statistics of one MAC instance.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Smoothed transmit rate in bytes per second.
    pub tx_speed: u64,
    /// Smoothed receive rate in bytes per second.
    pub rx_speed: u64,
    /// Completely reassembled frames delivered to the receiver.
    pub rx_counter: u64,
    /// Fully transmitted frames.
    pub tx_counter: u64,
}
