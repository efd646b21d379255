//! Cluster coordination layer for LlamaGrid.
//!
//! This crate contains everything two LlamaGrid processes need to agree on:
//! the UDP discovery protocol and service, deterministic leader election,
//! the partition planner, and the message types spoken over a worker's
//! persistent link to the dispatcher.

pub mod election;
pub mod errors;
pub mod message;
pub mod partition;
pub mod peer;
pub mod service;
pub mod wire;

pub use election::compute_leader;
pub use errors::{ClusterError, Result};
pub use message::{BroadcastPayload, DiscoveryMessage, MessageKind, PeerCapacity};
pub use partition::{plan_partitions, Member, Partition};
pub use peer::{generate_node_id, NodeId, Peer, PeerEvent, PeerTable};
pub use service::{DiscoveryConfig, DiscoveryEvent, DiscoveryService};
pub use wire::{
    ChatMessage, InferenceRequest, InferenceResponse, ModelStatus, ResourceUsage, ServerMessage,
    StatusReport, WorkerMessage, WorkerStatus, WorkloadStatus,
};

/// Milliseconds since the UNIX epoch, used for wire timestamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
