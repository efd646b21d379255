//! Cluster inspection endpoints over the worker registry.

use crate::api::error::{ApiError, ApiResult};
use crate::registry::WorkerRecord;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use llamagrid_cluster::{WorkerStatus, WorkloadStatus};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub total_workers: usize,
    pub connected_workers: usize,
    pub loaded_workers: usize,
    pub pending_requests: usize,
}

/// Health check endpoint
#[instrument]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}

/// Aggregate cluster counters
#[instrument(skip(state))]
pub async fn cluster_status(State(state): State<AppState>) -> ApiResult<Json<ClusterStatus>> {
    let workers = state
        .registry
        .snapshot()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let pending = state
        .pending
        .len()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ClusterStatus {
        total_workers: workers.len(),
        connected_workers: workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Connected)
            .count(),
        loaded_workers: workers
            .iter()
            .filter(|w| w.model_status.status == WorkloadStatus::Loaded)
            .count(),
        pending_requests: pending,
    }))
}

/// All known workers, ordered by node id
#[instrument(skip(state))]
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkerRecord>>> {
    let workers = state
        .registry
        .snapshot()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(workers))
}

/// One worker by node id
#[instrument(skip(state))]
pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<WorkerRecord>> {
    state
        .registry
        .get(&node_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown node: {}", node_id)))
}

/// Disconnect and forget a worker. Its connection is torn down as a side
/// effect of the registry removal.
#[instrument(skip(state))]
pub async fn delete_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<StatusCode> {
    let removed = state
        .registry
        .remove(&node_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("unknown node: {}", node_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamagrid_cluster::{ModelStatus, ResourceUsage, StatusReport};
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    fn state_with_worker(node_id: &str, workload: WorkloadStatus) -> AppState {
        let state = AppState::new(Duration::from_secs(1));
        let (tx, _rx) = mpsc::channel(8);
        state
            .registry
            .upsert(
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
                        status: workload,
                        progress: 100,
                        error: None,
                    },
                },
                Some(tx),
            )
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_cluster_status_counts() {
        let state = state_with_worker("w1", WorkloadStatus::Loaded);
        let status = cluster_status(State(state)).await.unwrap().0;

        assert_eq!(status.total_workers, 1);
        assert_eq!(status.connected_workers, 1);
        assert_eq!(status.loaded_workers, 1);
        assert_eq!(status.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_get_node_found_and_missing() {
        let state = state_with_worker("w1", WorkloadStatus::Loading);

        let record = get_node(State(state.clone()), Path("w1".to_string()))
            .await
            .unwrap()
            .0;
        assert_eq!(record.node_id, "w1");
        assert_eq!(record.model_status.status, WorkloadStatus::Loading);

        let missing = get_node(State(state), Path("nope".to_string())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_node() {
        let state = state_with_worker("w1", WorkloadStatus::Loaded);

        let code = delete_node(State(state.clone()), Path("w1".to_string()))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::NO_CONTENT);

        let again = delete_node(State(state), Path("w1".to_string())).await;
        assert!(matches!(again, Err(ApiError::NotFound(_))));
    }
}
