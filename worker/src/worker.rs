//! The worker runtime: one event loop driving discovery, partition
//! planning (when leader), the simulated load, and the dispatcher uplink.
//!
//! All mutable state lives on this single task; the only spawned helpers
//! are fire-and-forget inference executions reporting back over a channel.

use crate::config::Config;
use crate::engine;
use crate::errors::{Result, WorkerError};
use crate::model::ModelHost;
use crate::resources::ResourceSampler;
use crate::uplink::Uplink;
use llamagrid_cluster::{
    generate_node_id, plan_partitions, BroadcastPayload, DiscoveryConfig, DiscoveryEvent,
    DiscoveryService, InferenceRequest, InferenceResponse, Member, NodeId, PeerCapacity,
    ServerMessage, StatusReport, WorkerMessage, WorkerStatus,
};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};

pub struct Worker {
    node_id: NodeId,
    hostname: String,
    config: Config,
    capacity: PeerCapacity,
    sampler: Box<dyn ResourceSampler>,
    model: ModelHost,
    current_request: Option<String>,
    /// Gateway address learned from a server-info broadcast.
    dispatcher_addr: Option<String>,
}

impl Worker {
    pub fn new(config: Config, hostname: String, mut sampler: Box<dyn ResourceSampler>) -> Self {
        let node_id = generate_node_id();
        let capacity = sampler.capacity();
        tracing::info!(
            node_id = %node_id,
            hostname = %hostname,
            memory_bytes = capacity.memory_bytes,
            "Worker initialized"
        );
        Self {
            node_id,
            hostname,
            config,
            capacity,
            sampler,
            model: ModelHost::new(),
            current_request: None,
            dispatcher_addr: None,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Run until the surrounding task is cancelled.
    pub async fn run(mut self) -> Result<()> {
        let (mut discovery, mut events) = DiscoveryService::new(self.discovery_config()?);
        discovery.start().await?;

        let backoff = Duration::from_secs(self.config.dispatcher.reconnect_backoff_secs);
        loop {
            let addr = self.wait_for_dispatcher(&discovery, &mut events).await?;
            match Uplink::connect(&addr).await {
                Ok(uplink) => {
                    if let Err(e) = self.session(uplink, &discovery, &mut events).await {
                        tracing::warn!(error = %e, "Uplink session failed");
                    } else {
                        tracing::info!("Uplink closed by dispatcher");
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "Failed to reach dispatcher");
                }
            }
            self.current_request = None;
            sleep(backoff).await;
        }
    }

    fn discovery_config(&self) -> Result<DiscoveryConfig> {
        let settings = &self.config.discovery;
        let mut dc = DiscoveryConfig::new(self.node_id.clone(), self.hostname.clone());
        dc.port = settings.port;
        dc.bind_attempts = settings.bind_attempts;
        dc.broadcast_target = settings
            .broadcast_addr
            .parse()
            .map_err(|e| WorkerError::Config(format!("Invalid broadcast address: {}", e)))?;
        dc.heartbeat_interval = Duration::from_secs(settings.heartbeat_interval_secs);
        dc.cleanup_interval = Duration::from_secs(settings.cleanup_interval_secs);
        dc.liveness_timeout = Duration::from_secs(settings.liveness_timeout_secs);
        dc.capacity = Some(self.capacity);
        Ok(dc)
    }

    /// Resolve the gateway address: explicit config wins, otherwise keep
    /// processing discovery events until a server-info broadcast names one.
    async fn wait_for_dispatcher(
        &mut self,
        discovery: &DiscoveryService,
        events: &mut mpsc::Receiver<DiscoveryEvent>,
    ) -> Result<String> {
        if !self.config.dispatcher.address.is_empty() {
            return Ok(self.config.dispatcher.address.clone());
        }
        if let Some(addr) = &self.dispatcher_addr {
            return Ok(addr.clone());
        }

        tracing::info!("Waiting for dispatcher server-info broadcast");
        while let Some(event) = events.recv().await {
            self.handle_discovery_event(event, discovery).await?;
            if let Some(addr) = &self.dispatcher_addr {
                return Ok(addr.clone());
            }
        }
        Err(WorkerError::Network("discovery event channel closed".into()))
    }

    /// One connected session. Returns Ok on orderly close (caller
    /// reconnects), Err on transport failure.
    async fn session(
        &mut self,
        uplink: Uplink,
        discovery: &DiscoveryService,
        events: &mut mpsc::Receiver<DiscoveryEvent>,
    ) -> Result<()> {
        let (mut tx, mut rx) = uplink.split();
        let (done_tx, mut done_rx) = mpsc::channel::<InferenceResponse>(4);

        let mut status_ticker = interval(Duration::from_secs(
            self.config.dispatcher.status_interval_secs,
        ));
        let mut load_ticker = interval(Duration::from_millis(
            self.config.workload.load_step_interval_ms,
        ));
        let load_step = self.config.workload.load_step_percent;

        loop {
            tokio::select! {
                frame = rx.recv() => match frame? {
                    Some(ServerMessage::Connection { client_id }) => {
                        tracing::info!(client_id = %client_id, "Dispatcher welcomed connection");
                    }
                    Some(ServerMessage::Ping) => {
                        tx.send(&WorkerMessage::Pong).await?;
                    }
                    Some(ServerMessage::Inference(request)) => {
                        if let Some(refusal) = self.handle_inference(request, &done_tx) {
                            tx.send(&WorkerMessage::InferenceResponse(refusal)).await?;
                        }
                    }
                    None => return Ok(()),
                },
                Some(response) = done_rx.recv() => {
                    self.current_request = None;
                    tx.send(&WorkerMessage::InferenceResponse(response)).await?;
                }
                Some(event) = events.recv() => {
                    if self.handle_discovery_event(event, discovery).await? {
                        tx.send(&self.status_report()).await?;
                    }
                }
                _ = status_ticker.tick() => {
                    tx.send(&self.status_report()).await?;
                }
                _ = load_ticker.tick() => {
                    if self.model.tick(load_step) {
                        tx.send(&self.status_report()).await?;
                    }
                }
            }
        }
    }

    /// Apply one membership/broadcast event. Returns true when the change
    /// warrants an immediate status report to the dispatcher.
    async fn handle_discovery_event(
        &mut self,
        event: DiscoveryEvent,
        discovery: &DiscoveryService,
    ) -> Result<bool> {
        match event {
            DiscoveryEvent::PeerDiscovered { .. } | DiscoveryEvent::PeerLost { .. } => Ok(false),
            DiscoveryEvent::LeaderElected { is_self, node_id } => {
                if is_self {
                    tracing::info!("Assumed cluster leadership, planning partitions");
                    self.plan_and_distribute(discovery).await?;
                    Ok(true)
                } else {
                    tracing::info!(leader = %node_id, "Following new leader");
                    Ok(false)
                }
            }
            DiscoveryEvent::Broadcast { from, data } => {
                match serde_json::from_value::<BroadcastPayload>(data) {
                    Ok(BroadcastPayload::PartitionAssignment { partition }) => {
                        if partition.assigned_to == self.node_id {
                            // Broadcasts are unauthenticated datagrams, so
                            // reject a slice no valid plan could contain.
                            if partition.size_share > 0.0 {
                                self.model.assign(partition);
                            } else {
                                self.model.fail("assigned partition has no share");
                            }
                            Ok(true)
                        } else {
                            // Broadcast fan-out: someone else's slice.
                            Ok(false)
                        }
                    }
                    Ok(BroadcastPayload::ServerInfo { address, port }) => {
                        let addr = format!("{}:{}", address, port);
                        if self.dispatcher_addr.as_deref() != Some(addr.as_str()) {
                            tracing::info!(addr = %addr, "Learned dispatcher address");
                            self.dispatcher_addr = Some(addr);
                        }
                        Ok(false)
                    }
                    Err(e) => {
                        tracing::trace!(from = %from, error = %e, "Unrecognized broadcast payload");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Plan over the current view and distribute the slices. Own slice is
    /// applied locally, the rest go out best-effort over broadcast.
    async fn plan_and_distribute(&mut self, discovery: &DiscoveryService) -> Result<()> {
        let mut members = vec![Member::new(
            self.node_id.clone(),
            Some(self.capacity.memory_bytes),
        )];
        for peer in discovery.peers().await {
            members.push(Member::new(
                peer.node_id,
                peer.capacity.map(|c| c.memory_bytes),
            ));
        }

        let plan = plan_partitions(&members)?;
        tracing::info!(partitions = plan.len(), "Partition plan computed");

        for partition in plan {
            if partition.assigned_to == self.node_id {
                self.model.assign(partition);
            } else {
                let payload = BroadcastPayload::PartitionAssignment { partition };
                if let Err(e) = discovery.broadcast(serde_json::to_value(&payload)?).await {
                    tracing::warn!(error = %e, "Failed to broadcast partition assignment");
                }
            }
        }
        Ok(())
    }

    /// Accept or refuse one inference request. Acceptance spawns the
    /// simulated execution; a refusal response is returned for sending.
    fn handle_inference(
        &mut self,
        request: InferenceRequest,
        done_tx: &mpsc::Sender<InferenceResponse>,
    ) -> Option<InferenceResponse> {
        if let Some(reason) = self.refuse_reason() {
            tracing::warn!(request_id = %request.request_id, reason, "Refusing inference request");
            return Some(InferenceResponse {
                request_id: request.request_id,
                text: None,
                finish_reason: None,
                error: Some(reason.to_string()),
            });
        }

        tracing::info!(
            request_id = %request.request_id,
            partition_id = self.model.partition().map(|p| p.partition_id),
            "Executing inference request"
        );
        self.current_request = Some(request.request_id.clone());
        let done = done_tx.clone();
        tokio::spawn(async move {
            sleep(engine::latency(request.max_tokens)).await;
            let _ = done.send(engine::run(&request)).await;
        });
        None
    }

    /// The at-most-one-in-flight guard plus the loaded-model precondition.
    fn refuse_reason(&self) -> Option<&'static str> {
        if self.current_request.is_some() {
            Some("worker busy")
        } else if !self.model.is_loaded() {
            Some("model not loaded")
        } else {
            None
        }
    }

    fn status_report(&mut self) -> WorkerMessage {
        WorkerMessage::StatusUpdate(StatusReport {
            node_id: self.node_id.clone(),
            status: WorkerStatus::Connected,
            resources: self.sampler.sample(),
            model_status: self.model.status(),
        })
    }
}
