//! The peer table: the local node's view of cluster membership.
//!
//! Kept free of sockets so that convergence, expiry, and election behaviour
//! are directly unit-testable; [`crate::service::DiscoveryService`] owns the
//! UDP plumbing and feeds datagrams in here.

use crate::election::compute_leader;
use crate::message::{DiscoveryMessage, PeerCapacity};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Opaque node identifier, stable for the process lifetime.
pub type NodeId = String;

/// Generate a fresh node id: 8 random bytes, hex encoded.
pub fn generate_node_id() -> NodeId {
    hex::encode(rand::random::<[u8; 8]>())
}

/// One other node known to this node's discovery instance.
#[derive(Debug, Clone)]
pub struct Peer {
    pub node_id: NodeId,
    pub hostname: String,
    pub address: SocketAddr,
    pub capacity: Option<PeerCapacity>,
    pub last_seen: Instant,
}

/// Membership change produced by the peer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Discovered { node_id: NodeId, hostname: String },
    Lost { node_id: NodeId, hostname: String },
    LeaderChanged { node_id: NodeId, is_self: bool },
}

/// Local membership state: {self} ∪ {live peers}, plus the derived leader.
///
/// Only ever mutated from the discovery task; readers take snapshots.
pub struct PeerTable {
    local_id: NodeId,
    peers: HashMap<NodeId, Peer>,
    current_leader: Option<NodeId>,
    liveness_timeout: Duration,
}

impl PeerTable {
    pub fn new(local_id: NodeId, liveness_timeout: Duration) -> Self {
        Self {
            local_id,
            peers: HashMap::new(),
            current_leader: None,
            liveness_timeout,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// Apply one received datagram. Returns the membership events it caused.
    ///
    /// Heartbeats are idempotent: a known id only refreshes `last_seen`
    /// (and any updated hostname/capacity declaration).
    pub fn observe(
        &mut self,
        msg: &DiscoveryMessage,
        sender: SocketAddr,
        now: Instant,
    ) -> Vec<PeerEvent> {
        // Our own broadcasts loop back on some platforms.
        if msg.node_id == self.local_id {
            return Vec::new();
        }

        let mut events = Vec::new();
        let is_new = !self.peers.contains_key(&msg.node_id);

        self.peers.insert(
            msg.node_id.clone(),
            Peer {
                node_id: msg.node_id.clone(),
                hostname: msg.hostname.clone(),
                address: sender,
                capacity: msg.capacity,
                last_seen: now,
            },
        );

        if is_new {
            tracing::info!(
                node_id = %msg.node_id,
                hostname = %msg.hostname,
                sender = %sender,
                "Peer discovered"
            );
            events.push(PeerEvent::Discovered {
                node_id: msg.node_id.clone(),
                hostname: msg.hostname.clone(),
            });
            if let Some(change) = self.recompute_leader() {
                events.push(change);
            }
        }

        events
    }

    /// Remove every peer silent for longer than the liveness timeout.
    ///
    /// Fires `Lost` exactly once per removed peer, followed by a leader
    /// change if the expiry altered the election outcome.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerEvent> {
        let timeout = self.liveness_timeout;
        let expired: Vec<NodeId> = self
            .peers
            .values()
            .filter(|p| now.duration_since(p.last_seen) > timeout)
            .map(|p| p.node_id.clone())
            .collect();

        let mut events = Vec::new();
        for node_id in expired {
            if let Some(peer) = self.peers.remove(&node_id) {
                tracing::info!(
                    node_id = %peer.node_id,
                    hostname = %peer.hostname,
                    "Peer lost (liveness timeout)"
                );
                events.push(PeerEvent::Lost {
                    node_id: peer.node_id,
                    hostname: peer.hostname,
                });
            }
        }

        if !events.is_empty() {
            if let Some(change) = self.recompute_leader() {
                events.push(change);
            }
        }

        events
    }

    /// Recompute the leader from the current view.
    ///
    /// Pure and idempotent: an unchanged view never produces an event, so
    /// re-running election cannot emit duplicate `LeaderChanged`s.
    pub fn recompute_leader(&mut self) -> Option<PeerEvent> {
        let leader = compute_leader(&self.local_id, self.peers.keys()).clone();

        if self.current_leader.as_ref() == Some(&leader) {
            return None;
        }

        let is_self = leader == self.local_id;
        tracing::info!(leader = %leader, is_self, "Leader elected");
        self.current_leader = Some(leader.clone());
        Some(PeerEvent::LeaderChanged {
            node_id: leader,
            is_self,
        })
    }

    /// Snapshot of the live peers (not including self).
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn leader(&self) -> Option<&NodeId> {
        self.current_leader.as_ref()
    }

    pub fn is_leader(&self) -> bool {
        self.current_leader.as_ref() == Some(&self.local_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.current_leader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DiscoveryMessage;

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn addr() -> SocketAddr {
        "10.0.0.7:34399".parse().unwrap()
    }

    fn heartbeat(id: &str) -> DiscoveryMessage {
        DiscoveryMessage::heartbeat(id.into(), format!("host-{id}"), None)
    }

    #[test]
    fn test_node_id_generation() {
        let a = generate_node_id();
        let b = generate_node_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_first_message_discovers_peer() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let now = Instant::now();

        let events = table.observe(&heartbeat("peer-a"), addr(), now);
        assert!(events.contains(&PeerEvent::Discovered {
            node_id: "peer-a".into(),
            hostname: "host-peer-a".into(),
        }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_own_messages_ignored() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let events = table.observe(&heartbeat("self"), addr(), Instant::now());
        assert!(events.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_repeat_heartbeat_is_idempotent() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let now = Instant::now();

        let first = table.observe(&heartbeat("peer-a"), addr(), now);
        let second = table.observe(&heartbeat("peer-a"), addr(), now + Duration::from_secs(5));

        assert_eq!(first.len(), 2); // discovered + leader change
        assert!(second.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_heartbeat_refreshes_last_seen() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let start = Instant::now();

        table.observe(&heartbeat("peer-a"), addr(), start);
        // Refresh at t+10s, sweep at t+20s: only 10s of silence, stays live.
        table.observe(&heartbeat("peer-a"), addr(), start + Duration::from_secs(10));
        let events = table.sweep(start + Duration::from_secs(20));

        assert!(events.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_silent_peer_expires_exactly_once() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let start = Instant::now();
        table.observe(&heartbeat("peer-a"), addr(), start);

        let first = table.sweep(start + Duration::from_secs(16));
        let lost: Vec<_> = first
            .iter()
            .filter(|e| matches!(e, PeerEvent::Lost { .. }))
            .collect();
        assert_eq!(lost.len(), 1);
        assert!(table.is_empty());

        // A second sweep finds nothing to expire.
        let second = table.sweep(start + Duration::from_secs(30));
        assert!(second.is_empty());
    }

    #[test]
    fn test_peer_at_timeout_boundary_survives() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let start = Instant::now();
        table.observe(&heartbeat("peer-a"), addr(), start);

        // Exactly 15s of silence is not *longer than* the timeout.
        let events = table.sweep(start + TIMEOUT);
        assert!(events.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_leader_is_lowest_id_including_self() {
        let mut table = PeerTable::new("m".into(), TIMEOUT);
        let now = Instant::now();
        table.recompute_leader();
        assert!(table.is_leader());

        // A peer sorting above self does not take leadership.
        table.observe(&heartbeat("z"), addr(), now);
        assert!(table.is_leader());

        // A peer sorting below self does.
        let events = table.observe(&heartbeat("a"), addr(), now);
        assert!(events.contains(&PeerEvent::LeaderChanged {
            node_id: "a".into(),
            is_self: false,
        }));
        assert!(!table.is_leader());
        assert_eq!(table.leader(), Some(&"a".to_string()));
    }

    #[test]
    fn test_leadership_returns_on_leader_loss() {
        let mut table = PeerTable::new("m".into(), TIMEOUT);
        let start = Instant::now();
        table.recompute_leader();
        table.observe(&heartbeat("a"), addr(), start);
        assert!(!table.is_leader());

        let events = table.sweep(start + Duration::from_secs(16));
        assert!(events.contains(&PeerEvent::LeaderChanged {
            node_id: "m".into(),
            is_self: true,
        }));
        assert!(table.is_leader());
    }

    #[test]
    fn test_recompute_on_unchanged_view_emits_nothing() {
        let mut table = PeerTable::new("m".into(), TIMEOUT);
        table.recompute_leader();
        assert!(table.recompute_leader().is_none());
        assert!(table.recompute_leader().is_none());
    }

    #[test]
    fn test_views_converge_regardless_of_delivery_order() {
        // Two nodes that have seen the same member set agree on membership
        // and leader, no matter the interleaving of deliveries.
        let now = Instant::now();
        let ids = ["delta", "alpha", "charlie"];

        let mut table_a = PeerTable::new("bravo".into(), TIMEOUT);
        for id in ids {
            table_a.observe(&heartbeat(id), addr(), now);
        }

        let mut table_b = PeerTable::new("echo".into(), TIMEOUT);
        for id in ids.iter().rev() {
            table_b.observe(&heartbeat(id), addr(), now);
        }
        // Duplicate deliveries change nothing.
        table_b.observe(&heartbeat("alpha"), addr(), now);
        table_b.observe(&heartbeat("bravo"), addr(), now);

        assert_eq!(table_a.leader(), Some(&"alpha".to_string()));
        assert_eq!(table_b.leader(), Some(&"alpha".to_string()));
    }

    #[test]
    fn test_capacity_declaration_updates() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        let now = Instant::now();

        table.observe(&heartbeat("peer-a"), addr(), now);
        assert!(table.peers()[0].capacity.is_none());

        let with_cap = DiscoveryMessage::heartbeat(
            "peer-a".into(),
            "host-peer-a".into(),
            Some(PeerCapacity {
                memory_bytes: 4_000_000_000,
                has_accelerator: false,
            }),
        );
        table.observe(&with_cap, addr(), now);
        let cap = table.peers()[0].capacity.unwrap();
        assert_eq!(cap.memory_bytes, 4_000_000_000);
    }

    #[test]
    fn test_clear() {
        let mut table = PeerTable::new("self".into(), TIMEOUT);
        table.observe(&heartbeat("peer-a"), addr(), Instant::now());
        table.clear();
        assert!(table.is_empty());
        assert!(table.leader().is_none());
    }
}
