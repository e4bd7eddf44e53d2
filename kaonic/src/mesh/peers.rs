//! Fixed-capacity peer table.

use heapless::Vec;

use crate::time::Timestamp;

use super::NodeId;

/// Number of peers tracked per frontend. Overflow evicts the peer that has
/// been silent the longest.
pub const PEER_TABLE_CAPACITY: usize = 16;

/// Peer state flags, accumulated over the traffic heard from it.
pub mod peer_flags {
    /// The peer has beaconed.
    pub const BEACON: u8 = 0x01;
    /// The peer has carried data traffic.
    pub const DATA: u8 = 0x02;
}

/// One tracked peer.
#[derive(Debug, Copy, Clone)]
pub struct Peer {
    pub id: NodeId,
    pub last_seen: Timestamp,
    pub flags: u8,
}

/// Statically sized peer table with last-seen based eviction.
///
/// Entries never alias: refreshing a known id updates its timestamp in
/// place, so `last_seen` is monotonic per node id.
#[derive(Debug, Default)]
pub struct PeerTable {
    entries: Vec<Peer, PEER_TABLE_CAPACITY>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records that `id` was heard at `now`, accumulating `flags`.
    pub fn refresh(&mut self, id: NodeId, now: Timestamp, flags: u8) {
        if let Some(peer) = self.entries.iter_mut().find(|p| p.id == id) {
            if now > peer.last_seen {
                peer.last_seen = now;
            }
            peer.flags |= flags;
            return;
        }

        let peer = Peer {
            id,
            last_seen: now,
            flags,
        };
        if let Err(peer) = self.entries.push(peer) {
            // Full: evict the oldest entry.
            if let Some((oldest, _)) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.last_seen)
            {
                self.entries[oldest] = peer;
            }
        }
    }

    /// Drops every peer not heard from within `ttl_millis` of `now`.
    pub fn purge(&mut self, now: Timestamp, ttl_millis: u64) {
        self.entries
            .retain(|p| now.millis_since(p.last_seen) <= ttl_millis);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn refresh_updates_in_place() {
        let mut table = PeerTable::new();
        table.refresh(NodeId::new(1), ts(10), peer_flags::BEACON);
        table.refresh(NodeId::new(1), ts(20), peer_flags::DATA);
        assert_eq!(table.len(), 1);
        let peer = table.iter().next().unwrap();
        assert_eq!(peer.last_seen, ts(20));
        assert_eq!(peer.flags, peer_flags::BEACON | peer_flags::DATA);
    }

    #[test]
    fn last_seen_never_moves_backwards() {
        let mut table = PeerTable::new();
        table.refresh(NodeId::new(1), ts(30), peer_flags::BEACON);
        table.refresh(NodeId::new(1), ts(20), peer_flags::BEACON);
        assert_eq!(table.iter().next().unwrap().last_seen, ts(30));
    }

    #[test]
    fn overflow_evicts_the_oldest() {
        let mut table = PeerTable::new();
        for i in 0..PEER_TABLE_CAPACITY {
            table.refresh(NodeId::new(i as u64), ts(i as u64), peer_flags::BEACON);
        }
        assert_eq!(table.len(), PEER_TABLE_CAPACITY);

        // Node 0 is the oldest and must give way.
        table.refresh(NodeId::new(99), ts(1000), peer_flags::BEACON);
        assert_eq!(table.len(), PEER_TABLE_CAPACITY);
        assert!(table.iter().all(|p| p.id != NodeId::new(0)));
        assert!(table.iter().any(|p| p.id == NodeId::new(99)));
    }

    #[test]
    fn purge_drops_stale_peers() {
        let mut table = PeerTable::new();
        table.refresh(NodeId::new(1), ts(0), peer_flags::BEACON);
        table.refresh(NodeId::new(2), ts(350), peer_flags::BEACON);
        table.purge(ts(400), 100);
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().next().unwrap().id, NodeId::new(2));
    }
}
