//! Request routing: pick a worker, forward, await the correlated reply.

use crate::errors::{DispatcherError, Result};
use crate::pending::PendingRequests;
use crate::registry::Registry;
use llamagrid_cluster::{ChatMessage, InferenceRequest, InferenceResponse, ServerMessage};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

pub struct Dispatcher {
    registry: Arc<Registry>,
    pending: Arc<PendingRequests>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        pending: Arc<PendingRequests>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pending,
            request_timeout,
        }
    }

    /// Route one inference call to the least-loaded eligible worker and
    /// wait for its reply, bounded by the request timeout.
    ///
    /// Worker-reported errors (`worker busy`, `model not loaded`) come back
    /// as [`DispatcherError::WorkerReported`]; no retry is attempted here.
    pub async fn submit(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<InferenceResponse> {
        let (node_id, outbound) = self.registry.select_node()?;
        let request_id = Uuid::new_v4().to_string();

        tracing::info!(
            request_id = %request_id,
            node_id = %node_id,
            max_tokens,
            "Dispatching inference request"
        );

        let receiver = self.pending.register(&request_id)?;
        let forward = ServerMessage::Inference(InferenceRequest {
            request_id: request_id.clone(),
            messages,
            temperature,
            max_tokens,
        });

        if outbound.send(forward).await.is_err() {
            self.pending.abandon(&request_id)?;
            return Err(DispatcherError::WorkerUnavailable(node_id));
        }
        self.registry.mark_busy(&node_id, &request_id)?;

        let outcome = timeout(self.request_timeout, receiver).await;
        self.registry.clear_busy(&node_id)?;

        match outcome {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    Err(DispatcherError::WorkerReported(error))
                } else {
                    Ok(response)
                }
            }
            Ok(Err(_)) => {
                self.pending.abandon(&request_id)?;
                Err(DispatcherError::Internal(
                    "completion handle dropped before resolution".into(),
                ))
            }
            Err(_) => {
                // Late replies to this id are discarded as unmatched.
                self.pending.abandon(&request_id)?;
                tracing::warn!(request_id = %request_id, node_id = %node_id, "Inference request timed out");
                Err(DispatcherError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamagrid_cluster::{
        ModelStatus, ResourceUsage, StatusReport, WorkerMessage, WorkerStatus, WorkloadStatus,
    };
    use tokio::sync::mpsc;

    fn loaded_report(node_id: &str) -> StatusReport {
        StatusReport {
            node_id: node_id.into(),
            status: WorkerStatus::Connected,
            resources: ResourceUsage {
                cpu_percent: 10.0,
                memory_percent: 40.0,
                accelerator_percent: None,
                memory_bytes: 8_000_000_000,
                has_accelerator: false,
            },
            model_status: ModelStatus {
                status: WorkloadStatus::Loaded,
                progress: 100,
                error: None,
            },
        }
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: "user".into(),
            content: "hello there".into(),
        }]
    }

    struct Harness {
        dispatcher: Dispatcher,
        registry: Arc<Registry>,
        pending: Arc<PendingRequests>,
        inbox: mpsc::Receiver<ServerMessage>,
    }

    fn harness(timeout_ms: u64) -> Harness {
        let registry = Arc::new(Registry::new());
        let pending = Arc::new(PendingRequests::new());
        let (tx, inbox) = mpsc::channel(8);
        registry.upsert(loaded_report("w1"), Some(tx)).unwrap();

        let dispatcher = Dispatcher::new(
            registry.clone(),
            pending.clone(),
            Duration::from_millis(timeout_ms),
        );
        Harness {
            dispatcher,
            registry,
            pending,
            inbox,
        }
    }

    #[tokio::test]
    async fn test_submit_roundtrip() {
        let mut h = harness(5_000);

        let submit = tokio::spawn({
            let messages = messages();
            async move { h.dispatcher.submit(messages, 0.7, 64).await }
        });

        // Worker side: receive the forward, answer it.
        let forwarded = h.inbox.recv().await.unwrap();
        let ServerMessage::Inference(request) = forwarded else {
            panic!("expected inference forward");
        };
        assert_eq!(request.max_tokens, 64);

        h.pending
            .resolve(
                &request.request_id,
                InferenceResponse {
                    request_id: request.request_id.clone(),
                    text: Some("answer".into()),
                    finish_reason: Some("length".into()),
                    error: None,
                },
            )
            .unwrap();

        let response = submit.await.unwrap().unwrap();
        assert_eq!(response.text.as_deref(), Some("answer"));
        assert!(h.pending.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_no_eligible_worker() {
        let registry = Arc::new(Registry::new());
        let pending = Arc::new(PendingRequests::new());
        let dispatcher = Dispatcher::new(registry, pending, Duration::from_secs(1));

        let err = dispatcher.submit(messages(), 0.7, 64).await.unwrap_err();
        assert!(matches!(err, DispatcherError::NoEligibleWorker));
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let mut h = harness(100);

        let err = h.dispatcher.submit(messages(), 0.7, 64).await.unwrap_err();
        assert!(matches!(err, DispatcherError::Timeout));
        assert!(h.pending.is_empty().unwrap());

        // The worker record is no longer marked busy.
        let record = h.registry.get("w1").unwrap().unwrap();
        assert!(record.current_request.is_none());

        // A late reply is discarded as unmatched.
        let ServerMessage::Inference(request) = h.inbox.recv().await.unwrap() else {
            panic!("expected inference forward");
        };
        assert!(!h
            .pending
            .resolve(
                &request.request_id,
                InferenceResponse {
                    request_id: request.request_id.clone(),
                    text: Some("too late".into()),
                    finish_reason: None,
                    error: None,
                },
            )
            .unwrap());
    }

    #[tokio::test]
    async fn test_worker_reported_error_surfaces() {
        let mut h = harness(5_000);

        let submit = tokio::spawn({
            let messages = messages();
            async move { h.dispatcher.submit(messages, 0.7, 64).await }
        });

        let ServerMessage::Inference(request) = h.inbox.recv().await.unwrap() else {
            panic!("expected inference forward");
        };
        h.pending
            .resolve(
                &request.request_id,
                InferenceResponse {
                    request_id: request.request_id.clone(),
                    text: None,
                    finish_reason: None,
                    error: Some("worker busy".into()),
                },
            )
            .unwrap();

        let err = submit.await.unwrap().unwrap_err();
        match err {
            DispatcherError::WorkerReported(reason) => assert_eq!(reason, "worker busy"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dead_connection_surfaces_unavailable() {
        let registry = Arc::new(Registry::new());
        let pending = Arc::new(PendingRequests::new());
        let (tx, inbox) = mpsc::channel(8);
        registry.upsert(loaded_report("w1"), Some(tx)).unwrap();
        drop(inbox);

        let dispatcher =
            Dispatcher::new(registry, pending.clone(), Duration::from_secs(1));
        let err = dispatcher.submit(messages(), 0.7, 64).await.unwrap_err();
        assert!(matches!(err, DispatcherError::WorkerUnavailable(_)));
        assert!(pending.is_empty().unwrap());
    }
}
