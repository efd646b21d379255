use thiserror::Error;

/// Errors that can occur in the dispatcher.
#[derive(Error, Debug)]
pub enum DispatcherError {
    /// IO error occurred (listener bind, connection, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.)
    #[error("configuration error: {0}")]
    Config(String),

    /// No connected worker with a loaded model
    #[error("no eligible worker")]
    NoEligibleWorker,

    /// The selected worker's connection went away before the forward landed
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The worker answered the request with an error (busy, not loaded, ...)
    #[error("worker error: {0}")]
    WorkerReported(String),

    /// No reply within the request timeout
    #[error("inference request timed out")]
    Timeout,

    /// Internal invariant failure (poisoned lock, dropped channel)
    #[error("internal error: {0}")]
    Internal(String),

    /// Error from the cluster coordination layer
    #[error(transparent)]
    Cluster(#[from] llamagrid_cluster::ClusterError),
}

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatcherError>;

impl From<toml::ser::Error> for DispatcherError {
    fn from(e: toml::ser::Error) -> Self {
        DispatcherError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for DispatcherError {
    fn from(e: toml::de::Error) -> Self {
        DispatcherError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for DispatcherError {
    fn from(e: serde_json::Error) -> Self {
        DispatcherError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_messages() {
        assert_eq!(
            DispatcherError::NoEligibleWorker.to_string(),
            "no eligible worker"
        );
        assert_eq!(
            DispatcherError::Timeout.to_string(),
            "inference request timed out"
        );
    }

    #[test]
    fn test_worker_reported_wraps_reason() {
        let err = DispatcherError::WorkerReported("worker busy".into());
        assert_eq!(err.to_string(), "worker error: worker busy");
    }
}
