//! Discovery wire messages (UDP datagram, JSON body).

use crate::partition::Partition;
use crate::peer::NodeId;
use serde::{Deserialize, Serialize};

/// Datagram kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// First self-introduction after startup
    Announce,
    /// Periodic liveness beacon
    Heartbeat,
    /// Envelope carrying an opaque application payload
    Broadcast,
}

/// Capacity a node declares about itself in announce/heartbeat datagrams.
///
/// The partition planner weights shares by `memory_bytes` when every member
/// of the view declares one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerCapacity {
    /// Memory contributed to the workload, in bytes
    pub memory_bytes: u64,
    /// Whether an accelerator (GPU / NPU) is present
    pub has_accelerator: bool,
}

/// One discovery datagram.
///
/// `data` is only present for `broadcast` envelopes and is opaque at this
/// layer; [`BroadcastPayload`] gives the typed payloads LlamaGrid itself
/// sends through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    pub hostname: String,
    /// Sender wall-clock, milliseconds since the UNIX epoch
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<PeerCapacity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl DiscoveryMessage {
    pub fn announce(node_id: NodeId, hostname: String, capacity: Option<PeerCapacity>) -> Self {
        Self {
            kind: MessageKind::Announce,
            node_id,
            hostname,
            timestamp: crate::now_millis(),
            capacity,
            data: None,
        }
    }

    pub fn heartbeat(node_id: NodeId, hostname: String, capacity: Option<PeerCapacity>) -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            node_id,
            hostname,
            timestamp: crate::now_millis(),
            capacity,
            data: None,
        }
    }

    pub fn broadcast(node_id: NodeId, hostname: String, data: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Broadcast,
            node_id,
            hostname,
            timestamp: crate::now_millis(),
            capacity: None,
            data: Some(data),
        }
    }
}

/// Typed payloads LlamaGrid sends inside the broadcast envelope.
///
/// Receivers must tolerate payloads they do not understand; the envelope's
/// `data` field is opaque on the wire and other applications may share the
/// channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastPayload {
    /// Leader-to-member partition assignment. Members discard assignments
    /// whose `assigned_to` is not their own id.
    #[serde(rename = "partition-assignment")]
    PartitionAssignment { partition: Partition },

    /// Dispatcher announcing where its worker gateway listens.
    #[serde(rename = "server-info")]
    ServerInfo { address: String, port: u16 },
}
