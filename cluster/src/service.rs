//! UDP discovery service: periodic self-announcement, peer listening, and
//! the cleanup sweep, layered over [`PeerTable`].

use crate::errors::{ClusterError, Result};
use crate::message::{DiscoveryMessage, MessageKind, PeerCapacity};
use crate::peer::{NodeId, Peer, PeerEvent, PeerTable};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Well-known discovery port
pub const DISCOVERY_PORT: u16 = 34399;
/// Sequential ports probed when the preferred one is taken
pub const BIND_ATTEMPTS: u16 = 8;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const CLEANUP_INTERVAL_SECS: u64 = 5;
pub const LIVENESS_TIMEOUT_SECS: u64 = 15;

/// Tunables for one discovery instance.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub node_id: NodeId,
    pub hostname: String,
    /// Preferred bind port; sequential ports above it are probed on AddrInUse
    pub port: u16,
    pub bind_attempts: u16,
    /// Where announce/heartbeat/broadcast datagrams are sent
    pub broadcast_target: SocketAddr,
    /// Whether this instance announces itself as a member. Passive
    /// instances (the dispatcher) listen and broadcast but never join the
    /// membership view.
    pub announce: bool,
    pub heartbeat_interval: Duration,
    pub cleanup_interval: Duration,
    pub liveness_timeout: Duration,
    /// Capacity declared in every announce/heartbeat
    pub capacity: Option<PeerCapacity>,
}

impl DiscoveryConfig {
    pub fn new(node_id: NodeId, hostname: String) -> Self {
        Self {
            node_id,
            hostname,
            port: DISCOVERY_PORT,
            bind_attempts: BIND_ATTEMPTS,
            broadcast_target: SocketAddr::from(([255, 255, 255, 255], DISCOVERY_PORT)),
            announce: true,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            cleanup_interval: Duration::from_secs(CLEANUP_INTERVAL_SECS),
            liveness_timeout: Duration::from_secs(LIVENESS_TIMEOUT_SECS),
            capacity: None,
        }
    }
}

/// Events surfaced to the embedding process.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    PeerDiscovered {
        node_id: NodeId,
        hostname: String,
    },
    PeerLost {
        node_id: NodeId,
        hostname: String,
    },
    LeaderElected {
        node_id: NodeId,
        is_self: bool,
    },
    /// An application payload received through the broadcast envelope.
    Broadcast {
        from: NodeId,
        data: serde_json::Value,
    },
}

/// One node's discovery instance. Owns the UDP socket exclusively.
///
/// `new` hands back the event receiver; `start` binds and spawns the
/// heartbeat, receive, and cleanup tasks.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    table: Arc<RwLock<PeerTable>>,
    events: mpsc::Sender<DiscoveryEvent>,
    socket: Option<Arc<UdpSocket>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> (Self, mpsc::Receiver<DiscoveryEvent>) {
        let (events_tx, events_rx) = mpsc::channel(100);
        let table = Arc::new(RwLock::new(PeerTable::new(
            config.node_id.clone(),
            config.liveness_timeout,
        )));
        (
            Self {
                config,
                table,
                events: events_tx,
                socket: None,
                tasks: Vec::new(),
            },
            events_rx,
        )
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// Bind the socket and spawn the periodic tasks.
    pub async fn start(&mut self) -> Result<()> {
        let socket = Arc::new(self.bind().await?);
        socket.set_broadcast(true)?;

        tracing::info!(
            node_id = %self.config.node_id,
            local_addr = %socket.local_addr()?,
            target = %self.config.broadcast_target,
            "Discovery service started"
        );

        // Settle the initial leader (alone, that is us) before peers arrive.
        {
            let mut table = self.table.write().await;
            if let Some(change) = table.recompute_leader() {
                forward(vec![change], &self.events);
            }
        }

        if self.config.announce {
            self.tasks.push(self.spawn_heartbeat(socket.clone()));
        }
        self.tasks.push(self.spawn_receiver(socket.clone()));
        self.tasks.push(self.spawn_cleanup());
        self.socket = Some(socket);
        Ok(())
    }

    /// Abort the tasks, release the socket, and clear membership state.
    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.socket = None;
        self.table.write().await.clear();
        tracing::info!(node_id = %self.config.node_id, "Discovery service stopped");
    }

    /// Send an application payload to all reachable peers.
    pub async fn broadcast(&self, data: serde_json::Value) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(ClusterError::NotRunning)?;
        let msg = DiscoveryMessage::broadcast(
            self.config.node_id.clone(),
            self.config.hostname.clone(),
            data,
        );
        let bytes = serde_json::to_vec(&msg)?;
        socket.send_to(&bytes, self.config.broadcast_target).await?;
        Ok(())
    }

    /// Current ClusterView snapshot (live peers, self excluded).
    pub async fn peers(&self) -> Vec<Peer> {
        self.table.read().await.peers()
    }

    pub async fn leader(&self) -> Option<NodeId> {
        self.table.read().await.leader().cloned()
    }

    pub async fn is_leader(&self) -> bool {
        self.table.read().await.is_leader()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(ClusterError::NotRunning)?;
        Ok(socket.local_addr()?)
    }

    async fn bind(&self) -> Result<UdpSocket> {
        let attempts = self.config.bind_attempts.max(1);
        for offset in 0..attempts {
            let port = self.config.port.wrapping_add(offset);
            match UdpSocket::bind(("0.0.0.0", port)).await {
                Ok(socket) => return Ok(socket),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    tracing::warn!(port, "Discovery port taken, probing next");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ClusterError::BindExhausted {
            base_port: self.config.port,
            attempts,
        })
    }

    fn spawn_heartbeat(&self, socket: Arc<UdpSocket>) -> JoinHandle<()> {
        let config = self.config.clone();
        tokio::spawn(async move {
            let mut ticker = interval(config.heartbeat_interval);
            let mut announced = false;
            loop {
                ticker.tick().await;
                let msg = if announced {
                    DiscoveryMessage::heartbeat(
                        config.node_id.clone(),
                        config.hostname.clone(),
                        config.capacity,
                    )
                } else {
                    DiscoveryMessage::announce(
                        config.node_id.clone(),
                        config.hostname.clone(),
                        config.capacity,
                    )
                };
                match serde_json::to_vec(&msg) {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, config.broadcast_target).await {
                            tracing::warn!(error = %e, "Failed to send heartbeat");
                        } else {
                            announced = true;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize heartbeat");
                    }
                }
            }
        })
    }

    fn spawn_receiver(&self, socket: Arc<UdpSocket>) -> JoinHandle<()> {
        let table = self.table.clone();
        let events = self.events.clone();
        let local_id = self.config.node_id.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, sender)) => {
                        let msg: DiscoveryMessage = match serde_json::from_slice(&buf[..len]) {
                            Ok(msg) => msg,
                            Err(e) => {
                                tracing::debug!(
                                    error = %e,
                                    sender = %sender,
                                    "Dropping malformed discovery datagram"
                                );
                                continue;
                            }
                        };

                        // Only announce/heartbeat datagrams carry membership;
                        // broadcast envelopes are application payload.
                        if msg.kind != MessageKind::Broadcast {
                            let peer_events =
                                table.write().await.observe(&msg, sender, Instant::now());
                            forward(peer_events, &events);
                        }

                        if msg.kind == MessageKind::Broadcast && msg.node_id != local_id {
                            if let Some(data) = msg.data {
                                let ev = DiscoveryEvent::Broadcast {
                                    from: msg.node_id,
                                    data,
                                };
                                if events.try_send(ev).is_err() {
                                    tracing::debug!("Discovery event channel full, payload dropped");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to receive datagram");
                    }
                }
            }
        })
    }

    fn spawn_cleanup(&self) -> JoinHandle<()> {
        let table = self.table.clone();
        let events = self.events.clone();
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let peer_events = table.write().await.sweep(Instant::now());
                forward(peer_events, &events);
            }
        })
    }
}

fn forward(peer_events: Vec<PeerEvent>, tx: &mpsc::Sender<DiscoveryEvent>) {
    for event in peer_events {
        let ev = match event {
            PeerEvent::Discovered { node_id, hostname } => {
                DiscoveryEvent::PeerDiscovered { node_id, hostname }
            }
            PeerEvent::Lost { node_id, hostname } => DiscoveryEvent::PeerLost { node_id, hostname },
            PeerEvent::LeaderChanged { node_id, is_self } => {
                DiscoveryEvent::LeaderElected { node_id, is_self }
            }
        };
        if tx.try_send(ev).is_err() {
            tracing::debug!("Discovery event channel full, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn test_config(id: &str) -> DiscoveryConfig {
        let mut config = DiscoveryConfig::new(id.into(), format!("host-{id}"));
        // Ephemeral port; tests aim datagrams at loopback explicitly.
        config.port = 0;
        config.bind_attempts = 1;
        config.broadcast_target = SocketAddr::from(([127, 0, 0, 1], 1));
        config.heartbeat_interval = Duration::from_millis(50);
        config.cleanup_interval = Duration::from_millis(50);
        config
    }

    async fn next_event(rx: &mut mpsc::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for discovery event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_broadcast_requires_running() {
        let (service, _rx) = DiscoveryService::new(test_config("idle"));
        let err = service.broadcast(serde_json::json!({"x": 1})).await;
        assert!(matches!(err, Err(ClusterError::NotRunning)));
    }

    #[tokio::test]
    async fn test_bind_exhaustion_reported() {
        let blocker = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let mut config = test_config("crowded");
        config.port = taken;
        config.bind_attempts = 1;

        let (mut service, _rx) = DiscoveryService::new(config);
        let err = service.start().await;
        assert!(matches!(
            err,
            Err(ClusterError::BindExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_start_elects_self_when_alone() {
        let (mut service, mut rx) = DiscoveryService::new(test_config("loner"));
        service.start().await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(
            event,
            DiscoveryEvent::LeaderElected {
                node_id: "loner".into(),
                is_self: true,
            }
        );
        assert!(service.is_leader().await);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_peer_discovery_and_broadcast_over_loopback() {
        // Receiver side first, so the sender knows where to aim.
        let (mut receiver, mut rx_events) = DiscoveryService::new(test_config("bbb"));
        receiver.start().await.unwrap();
        let target = SocketAddr::from((
            [127, 0, 0, 1],
            receiver.local_addr().unwrap().port(),
        ));

        let mut sender_config = test_config("aaa");
        sender_config.broadcast_target = target;
        let (mut sender, mut _sender_events) = DiscoveryService::new(sender_config);
        sender.start().await.unwrap();

        // Receiver elects itself first, then sees the sender's heartbeat.
        let mut saw_discovered = false;
        let mut saw_leader_handoff = false;
        for _ in 0..4 {
            match next_event(&mut rx_events).await {
                DiscoveryEvent::PeerDiscovered { node_id, .. } if node_id == "aaa" => {
                    saw_discovered = true;
                }
                DiscoveryEvent::LeaderElected { node_id, is_self } if node_id == "aaa" => {
                    assert!(!is_self);
                    saw_leader_handoff = true;
                }
                _ => {}
            }
            if saw_discovered && saw_leader_handoff {
                break;
            }
        }
        assert!(saw_discovered);
        assert!(saw_leader_handoff);
        assert_eq!(receiver.peers().await.len(), 1);

        // An application payload travels the same channel.
        sender
            .broadcast(serde_json::json!({"kind": "probe", "value": 7}))
            .await
            .unwrap();
        loop {
            if let DiscoveryEvent::Broadcast { from, data } = next_event(&mut rx_events).await {
                assert_eq!(from, "aaa");
                assert_eq!(data["value"], 7);
                break;
            }
        }

        sender.stop().await;
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_membership() {
        let (mut service, _rx) = DiscoveryService::new(test_config("ephemeral"));
        service.start().await.unwrap();
        service.stop().await;

        assert!(service.peers().await.is_empty());
        assert!(service.leader().await.is_none());
        assert!(matches!(
            service.broadcast(serde_json::json!({})).await,
            Err(ClusterError::NotRunning)
        ));
    }
}
