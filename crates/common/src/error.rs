use thiserror::Error;

/// Common error types for PeerNet
#[derive(Debug, Error)]
pub enum PeerNetError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Lookup timeout")]
    Timeout,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for PeerNet operations
pub type Result<T> = std::result::Result<T, PeerNetError>;

impl PeerNetError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
