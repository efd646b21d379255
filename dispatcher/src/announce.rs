//! Server-info announcer: a passive discovery instance that tells workers
//! where the gateway listens.
//!
//! The dispatcher never announces itself as a cluster member, so it takes
//! no part in elections or partition plans. It only listens for worker
//! heartbeats and answers each newly discovered worker with a server-info
//! broadcast.

use crate::config::DiscoverySettings;
use crate::errors::{DispatcherError, Result};
use llamagrid_cluster::{
    generate_node_id, BroadcastPayload, DiscoveryConfig, DiscoveryEvent, DiscoveryService,
};
use tokio::sync::mpsc;
use tokio::time::Duration;

pub fn discovery_config(settings: &DiscoverySettings) -> Result<DiscoveryConfig> {
    let mut dc = DiscoveryConfig::new(generate_node_id(), "llamagrid-dispatcher".to_string());
    dc.port = settings.port;
    dc.bind_attempts = settings.bind_attempts;
    dc.broadcast_target = settings
        .broadcast_addr
        .parse()
        .map_err(|e| DispatcherError::Config(format!("Invalid broadcast address: {}", e)))?;
    dc.announce = false;
    dc.heartbeat_interval = Duration::from_secs(settings.heartbeat_interval_secs);
    dc.cleanup_interval = Duration::from_secs(settings.cleanup_interval_secs);
    dc.liveness_timeout = Duration::from_secs(settings.liveness_timeout_secs);
    Ok(dc)
}

/// Run until the event channel closes. Each newly discovered worker gets a
/// server-info broadcast pointing at the gateway.
pub async fn run_announcer(
    discovery: DiscoveryService,
    mut events: mpsc::Receiver<DiscoveryEvent>,
    advertise_addr: String,
    gateway_port: u16,
) {
    while let Some(event) = events.recv().await {
        if let DiscoveryEvent::PeerDiscovered { node_id, .. } = event {
            tracing::info!(node_id = %node_id, "Worker appeared on mesh, announcing gateway");
            let payload = BroadcastPayload::ServerInfo {
                address: advertise_addr.clone(),
                port: gateway_port,
            };
            match serde_json::to_value(&payload) {
                Ok(data) => {
                    if let Err(e) = discovery.broadcast(data).await {
                        tracing::warn!(error = %e, "Failed to broadcast server info");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server info");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_discovery_config_is_passive() {
        let settings = Config::default().discovery;
        let dc = discovery_config(&settings).unwrap();
        assert!(!dc.announce);
        assert_eq!(dc.port, 34399);
    }

    #[test]
    fn test_bad_broadcast_addr_rejected() {
        let mut settings = Config::default().discovery;
        settings.broadcast_addr = "garbage".into();
        assert!(discovery_config(&settings).is_err());
    }
}
