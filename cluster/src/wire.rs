//! Messages spoken over a worker's persistent link to the dispatcher.
//!
//! The link is an ordered, message-framed stream carrying JSON objects of
//! the shape `{"type": ..., "data": ...}`. Both processes depend on these
//! types, so they live in the shared crate.

use serde::{Deserialize, Serialize};

/// Connection-level status a worker reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Lifecycle of the partition workload on one worker.
///
/// unloaded -> loading -> loaded, or loading -> error. Error freezes
/// progress at whatever it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Unloaded,
    Loading,
    Loaded,
    Error,
}

/// Workload state plus load progress, as reported in status updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub status: WorkloadStatus,
    /// Load progress, 0..=100. Monotonic while loading.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelStatus {
    pub fn unloaded() -> Self {
        Self {
            status: WorkloadStatus::Unloaded,
            progress: 0,
            error: None,
        }
    }

    pub fn begin_loading(&mut self) {
        self.status = WorkloadStatus::Loading;
        self.progress = 0;
        self.error = None;
    }

    /// Advance simulated load progress. Returns true once loaded.
    pub fn advance(&mut self, step: u8) -> bool {
        if self.status != WorkloadStatus::Loading {
            return self.status == WorkloadStatus::Loaded;
        }
        self.progress = self.progress.saturating_add(step).min(100);
        if self.progress >= 100 {
            self.status = WorkloadStatus::Loaded;
            true
        } else {
            false
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = WorkloadStatus::Error;
        self.error = Some(message.into());
    }

    pub fn is_loaded(&self) -> bool {
        self.status == WorkloadStatus::Loaded
    }
}

/// Utilization sample included in a status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// CPU utilization, 0..=100
    pub cpu_percent: f32,
    /// Memory utilization, 0..=100
    pub memory_percent: f32,
    /// Accelerator utilization, 0..=100, when one is present and sampled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_percent: Option<f32>,
    /// Total memory on the host, bytes
    pub memory_bytes: u64,
    pub has_accelerator: bool,
}

impl ResourceUsage {
    /// The scheduling load figure: accelerator utilization when sampled,
    /// CPU otherwise.
    pub fn load(&self) -> f32 {
        self.accelerator_percent.unwrap_or(self.cpu_percent)
    }
}

/// One full status report from a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub node_id: String,
    pub status: WorkerStatus,
    pub resources: ResourceUsage,
    pub model_status: ModelStatus,
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// An inference request forwarded to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A worker's asynchronous reply, matched to the request by id.
///
/// Exactly one of `text` or `error` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Worker to dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkerMessage {
    #[serde(rename = "statusUpdate")]
    StatusUpdate(StatusReport),
    #[serde(rename = "inference_response")]
    InferenceResponse(InferenceResponse),
    #[serde(rename = "pong")]
    Pong,
}

/// Dispatcher to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Welcome frame sent as soon as the connection opens.
    #[serde(rename = "connection")]
    Connection {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    #[serde(rename = "inference")]
    Inference(InferenceRequest),
    #[serde(rename = "ping")]
    Ping,
}
