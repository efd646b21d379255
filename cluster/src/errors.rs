use thiserror::Error;

/// Errors that can occur in the cluster layer.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// IO error occurred (socket bind, send, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// All bind attempts in the discovery port range were exhausted
    #[error("no usable discovery port after {attempts} bind attempts starting at {base_port}")]
    BindExhausted { base_port: u16, attempts: u16 },

    /// Operation requires a running discovery service
    #[error("discovery service is not running")]
    NotRunning,

    /// Partition planning over an empty member set
    #[error("cannot plan partitions over an empty member set")]
    EmptyMemberSet,
}

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
