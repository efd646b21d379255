//! The worker registry: one record per connected worker, updated by status
//! reports from the gateway and read by the scheduler and the HTTP API.

use crate::errors::{DispatcherError, Result};
use llamagrid_cluster::{
    now_millis, ModelStatus, NodeId, ResourceUsage, ServerMessage, StatusReport, WorkerStatus,
    WorkloadStatus,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::{broadcast, mpsc};

pub type RequestId = String;

/// What the dispatcher knows about one connected worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub node_id: NodeId,
    pub status: WorkerStatus,
    pub resources: ResourceUsage,
    pub model_status: ModelStatus,
    pub current_request: Option<RequestId>,
    /// Last status report, milliseconds since the UNIX epoch
    pub last_heartbeat: u64,
    pub connected_at: u64,
}

impl WorkerRecord {
    fn eligible(&self) -> bool {
        self.status == WorkerStatus::Connected
            && self.model_status.status == WorkloadStatus::Loaded
    }
}

/// Registry change, published to observers (dashboards, logs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    WorkerJoined { node_id: NodeId },
    WorkerUpdated { node_id: NodeId },
    WorkerLeft { node_id: NodeId },
}

struct WorkerEntry {
    record: WorkerRecord,
    /// Outbound handle to the worker's connection task. Dropping it (by
    /// removing the entry) makes that task shut the connection down.
    outbound: mpsc::Sender<ServerMessage>,
    awaiting_pong: bool,
}

/// Single-writer container for all worker records.
///
/// Only gateway connection tasks mutate it; everything else takes
/// snapshots.
pub struct Registry {
    workers: RwLock<HashMap<NodeId, WorkerEntry>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            workers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Apply one status report. `outbound` is consumed only when the report
    /// introduces a new worker; established workers keep their handle.
    pub fn upsert(
        &self,
        report: StatusReport,
        outbound: Option<mpsc::Sender<ServerMessage>>,
    ) -> Result<()> {
        let mut workers = self.write()?;
        let now = now_millis();

        match workers.get_mut(&report.node_id) {
            Some(entry) => {
                entry.record.status = report.status;
                entry.record.resources = report.resources;
                entry.record.model_status = report.model_status;
                entry.record.last_heartbeat = now;
                self.publish(RegistryEvent::WorkerUpdated {
                    node_id: report.node_id,
                });
            }
            None => {
                let Some(outbound) = outbound else {
                    // Report raced with removal of this connection.
                    tracing::debug!(node_id = %report.node_id, "Status report for pruned connection ignored");
                    return Ok(());
                };
                tracing::info!(node_id = %report.node_id, "Worker registered");
                workers.insert(
                    report.node_id.clone(),
                    WorkerEntry {
                        record: WorkerRecord {
                            node_id: report.node_id.clone(),
                            status: report.status,
                            resources: report.resources,
                            model_status: report.model_status,
                            current_request: None,
                            last_heartbeat: now,
                            connected_at: now,
                        },
                        outbound,
                        awaiting_pong: false,
                    },
                );
                self.publish(RegistryEvent::WorkerJoined {
                    node_id: report.node_id,
                });
            }
        }
        Ok(())
    }

    /// Remove a worker. Dropping its outbound handle terminates the
    /// connection task.
    pub fn remove(&self, node_id: &str) -> Result<bool> {
        let removed = self.write()?.remove(node_id).is_some();
        if removed {
            tracing::info!(node_id = %node_id, "Worker removed");
            self.publish(RegistryEvent::WorkerLeft {
                node_id: node_id.to_string(),
            });
        }
        Ok(removed)
    }

    pub fn get(&self, node_id: &str) -> Result<Option<WorkerRecord>> {
        Ok(self.read()?.get(node_id).map(|e| e.record.clone()))
    }

    pub fn snapshot(&self) -> Result<Vec<WorkerRecord>> {
        let mut records: Vec<WorkerRecord> =
            self.read()?.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(records)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Greedy least-loaded scheduling: connected workers with a loaded
    /// model, minimum reported load, first seen wins ties.
    pub fn select_node(&self) -> Result<(NodeId, mpsc::Sender<ServerMessage>)> {
        let workers = self.read()?;
        let mut best: Option<(&WorkerEntry, u64)> = None;
        for entry in workers.values() {
            if !entry.record.eligible() {
                continue;
            }
            let load = entry.record.resources.load();
            let connected_at = entry.record.connected_at;
            let better = match best {
                None => true,
                Some((current, current_connected)) => {
                    let current_load = current.record.resources.load();
                    load < current_load
                        || (load == current_load && connected_at < current_connected)
                }
            };
            if better {
                best = Some((entry, connected_at));
            }
        }

        let (entry, _) = best.ok_or(DispatcherError::NoEligibleWorker)?;
        Ok((entry.record.node_id.clone(), entry.outbound.clone()))
    }

    pub fn mark_busy(&self, node_id: &str, request_id: &str) -> Result<()> {
        if let Some(entry) = self.write()?.get_mut(node_id) {
            entry.record.current_request = Some(request_id.to_string());
        }
        Ok(())
    }

    pub fn clear_busy(&self, node_id: &str) -> Result<()> {
        if let Some(entry) = self.write()?.get_mut(node_id) {
            entry.record.current_request = None;
        }
        Ok(())
    }

    pub fn note_pong(&self, node_id: &str) -> Result<()> {
        if let Some(entry) = self.write()?.get_mut(node_id) {
            entry.awaiting_pong = false;
        }
        Ok(())
    }

    /// Remove every worker that never answered the previous ping round.
    /// Returns the pruned ids.
    pub fn prune_unresponsive(&self) -> Result<Vec<NodeId>> {
        let stale: Vec<NodeId> = self
            .read()?
            .values()
            .filter(|e| e.awaiting_pong)
            .map(|e| e.record.node_id.clone())
            .collect();
        for node_id in &stale {
            tracing::warn!(node_id = %node_id, "Worker failed ping liveness check");
            self.remove(node_id)?;
        }
        Ok(stale)
    }

    /// Mark every worker as owing a pong and hand back the send handles
    /// for the ping fan-out.
    pub fn begin_ping_round(&self) -> Result<Vec<(NodeId, mpsc::Sender<ServerMessage>)>> {
        let mut workers = self.write()?;
        let mut targets = Vec::with_capacity(workers.len());
        for entry in workers.values_mut() {
            entry.awaiting_pong = true;
            targets.push((entry.record.node_id.clone(), entry.outbound.clone()));
        }
        Ok(targets)
    }

    fn publish(&self, event: RegistryEvent) {
        // No observers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<NodeId, WorkerEntry>>> {
        self.workers
            .read()
            .map_err(|_| DispatcherError::Internal("registry lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<NodeId, WorkerEntry>>> {
        self.workers
            .write()
            .map_err(|_| DispatcherError::Internal("registry lock poisoned".into()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
