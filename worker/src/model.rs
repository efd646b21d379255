//! The worker's slot for its assigned partition and the simulated load
//! procedure that brings it to `loaded`.

use llamagrid_cluster::{ModelStatus, Partition};

/// Holds at most one partition and its workload status.
pub struct ModelHost {
    partition: Option<Partition>,
    status: ModelStatus,
}

impl ModelHost {
    pub fn new() -> Self {
        Self {
            partition: None,
            status: ModelStatus::unloaded(),
        }
    }

    /// Accept a partition assignment and (re)start loading.
    ///
    /// A fresh assignment always restarts the load, even mid-load; the
    /// newest plan wins.
    pub fn assign(&mut self, partition: Partition) {
        tracing::info!(
            partition_id = partition.partition_id,
            total = partition.total_partitions,
            share = partition.size_share,
            "Partition assigned, loading"
        );
        self.partition = Some(partition);
        self.status.begin_loading();
    }

    /// One load-progress step. Returns true when the visible status
    /// changed and a fresh report should go out.
    pub fn tick(&mut self, step: u8) -> bool {
        if !self.is_loading() {
            return false;
        }
        let done = self.status.advance(step);
        if done {
            tracing::info!("Partition load complete");
        }
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "Partition load failed");
        self.status.fail(message);
    }

    pub fn status(&self) -> ModelStatus {
        self.status.clone()
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.status.is_loaded()
    }

    pub fn is_loading(&self) -> bool {
        self.status.status == llamagrid_cluster::WorkloadStatus::Loading
    }
}

impl Default for ModelHost {
    fn default() -> Self {
        Self::new()
    }
}
