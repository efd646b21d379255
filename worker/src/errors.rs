use thiserror::Error;

/// Errors that can occur in the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// IO error occurred (file operations, network, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.)
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (uplink connect failed, protocol error, etc.)
    #[error("network error: {0}")]
    Network(String),

    /// Error from the cluster coordination layer
    #[error(transparent)]
    Cluster(#[from] llamagrid_cluster::ClusterError),
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

impl From<toml::ser::Error> for WorkerError {
    fn from(e: toml::ser::Error) -> Self {
        WorkerError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for WorkerError {
    fn from(e: toml::de::Error) -> Self {
        WorkerError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        WorkerError::Serialization(e.to_string())
    }
}
