//! In-flight request bookkeeping: request id -> completion handle.

use crate::errors::{DispatcherError, Result};
use crate::registry::RequestId;
use llamagrid_cluster::InferenceResponse;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::oneshot;

struct PendingEntry {
    submitted_at: Instant,
    complete: oneshot::Sender<InferenceResponse>,
}

/// Map of requests awaiting a worker reply. Entries leave the map on
/// resolution or timeout, never later.
pub struct PendingRequests {
    inner: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh request and get the handle its reply will arrive on.
    pub fn register(&self, request_id: &str) -> Result<oneshot::Receiver<InferenceResponse>> {
        let (tx, rx) = oneshot::channel();
        self.lock()?.insert(
            request_id.to_string(),
            PendingEntry {
                submitted_at: Instant::now(),
                complete: tx,
            },
        );
        Ok(rx)
    }

    /// Resolve a request with the worker's reply. Returns false for an
    /// unmatched id (late reply after timeout), which callers discard.
    pub fn resolve(&self, request_id: &str, response: InferenceResponse) -> Result<bool> {
        let entry = self.lock()?.remove(request_id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    request_id = %request_id,
                    elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
                    "Inference request resolved"
                );
                // Receiver gone means the submitter already timed out.
                let _ = entry.complete.send(response);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop a request that timed out; its late reply (if any) will be
    /// unmatched.
    pub fn abandon(&self, request_id: &str) -> Result<()> {
        self.lock()?.remove(request_id);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RequestId, PendingEntry>>> {
        self.inner
            .lock()
            .map_err(|_| DispatcherError::Internal("pending-request lock poisoned".into()))
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
