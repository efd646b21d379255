//! Worker gateway: accepts persistent connections from workers and keeps
//! the registry in sync with what they report.
//!
//! Framing is newline-delimited JSON. Each connection gets one task that
//! owns both directions; outbound traffic from the rest of the dispatcher
//! arrives over the mpsc handle stored in the registry. Removing a worker
//! from the registry drops that handle, which ends the task and closes the
//! socket.

use crate::errors::Result;
use crate::pending::PendingRequests;
use crate::registry::Registry;
use llamagrid_cluster::{NodeId, ServerMessage, WorkerMessage};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use uuid::Uuid;

pub struct Gateway {
    registry: Arc<Registry>,
    pending: Arc<PendingRequests>,
    ping_interval: Duration,
}

impl Gateway {
    pub fn new(
        registry: Arc<Registry>,
        pending: Arc<PendingRequests>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            registry,
            pending,
            ping_interval,
        }
    }

    /// Accept loop. Runs until the surrounding task is cancelled.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "Worker gateway listening");

        self.spawn_ping_sweep();

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!(peer = %peer, "Worker connection accepted");
                    let registry = self.registry.clone();
                    let pending = self.pending.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, registry, pending).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept worker connection");
                }
            }
        }
    }

    /// Connection-level liveness on top of the status-report heartbeats:
    /// prune whoever missed the previous round, then ping everyone again.
    fn spawn_ping_sweep(&self) {
        let registry = self.registry.clone();
        let period = self.ping_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.prune_unresponsive() {
                    Ok(pruned) if !pruned.is_empty() => {
                        tracing::info!(count = pruned.len(), "Pruned unresponsive workers");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Ping sweep failed"),
                }
                match registry.begin_ping_round() {
                    Ok(targets) => {
                        for (node_id, outbound) in targets {
                            if outbound.send(ServerMessage::Ping).await.is_err() {
                                tracing::debug!(node_id = %node_id, "Ping not delivered, connection gone");
                            }
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Ping sweep failed"),
                }
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    pending: Arc<PendingRequests>,
) {
    let client_id = Uuid::new_v4().to_string();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let welcome = ServerMessage::Connection {
        client_id: client_id.clone(),
    };
    if write_frame(&mut write, &welcome).await.is_err() {
        return;
    }

    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(32);
    // Handed to the registry on the first status report; once it is gone,
    // out_rx closing means the registry dropped us.
    let mut unbound_tx = Some(out_tx);
    let mut node_id: Option<NodeId> = None;

    loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(msg) => {
                    if let Err(e) = write_frame(&mut write, &msg).await {
                        tracing::warn!(client_id = %client_id, error = %e, "Failed to write to worker");
                        break;
                    }
                }
                None => {
                    tracing::info!(client_id = %client_id, "Connection terminated by registry");
                    break;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let msg: WorkerMessage = match serde_json::from_str(&line) {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::debug!(client_id = %client_id, error = %e, "Dropping malformed worker frame");
                            continue;
                        }
                    };
                    handle_worker_message(msg, &registry, &pending, &mut node_id, &mut unbound_tx);
                }
                Ok(None) => {
                    tracing::info!(client_id = %client_id, "Worker closed connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(client_id = %client_id, error = %e, "Worker connection error");
                    break;
                }
            },
        }
    }

    if let Some(node_id) = node_id {
        if let Err(e) = registry.remove(&node_id) {
            tracing::error!(node_id = %node_id, error = %e, "Failed to prune worker record");
        }
    }
}

fn handle_worker_message(
    msg: WorkerMessage,
    registry: &Registry,
    pending: &PendingRequests,
    node_id: &mut Option<NodeId>,
    unbound_tx: &mut Option<mpsc::Sender<ServerMessage>>,
) {
    match msg {
        WorkerMessage::StatusUpdate(report) => {
            *node_id = Some(report.node_id.clone());
            if let Err(e) = registry.upsert(report, unbound_tx.take()) {
                tracing::error!(error = %e, "Failed to apply status report");
            }
        }
        WorkerMessage::InferenceResponse(response) => {
            let request_id = response.request_id.clone();
            match pending.resolve(&request_id, response) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(request_id = %request_id, "Discarding unmatched inference reply");
                }
                Err(e) => tracing::error!(error = %e, "Failed to resolve inference reply"),
            }
        }
        WorkerMessage::Pong => {
            if let Some(node_id) = node_id.as_deref() {
                if let Err(e) = registry.note_pong(node_id) {
                    tracing::error!(error = %e, "Failed to record pong");
                }
            }
        }
    }
}

async fn write_frame(write: &mut OwnedWriteHalf, msg: &ServerMessage) -> Result<()> {
    let mut frame = serde_json::to_vec(msg)?;
    frame.push(b'\n');
    write.write_all(&frame).await?;
    Ok(())
}
