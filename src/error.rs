use thiserror::Error;

/// Result type alias for FluxMQ client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur in the FluxMQ client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broker error
    #[error("Broker error: {0}")]
    Broker(String),

    /// Network timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Topic not found
    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    /// Partition not found
    #[error("Partition not found: topic={topic}, partition={partition}")]
    PartitionNotFound { topic: String, partition: u32 },

    /// Offset out of range
    #[error("Offset out of range: {offset}")]
    OffsetOutOfRange { offset: u64 },

    /// Consumer errors
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Stream processing error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Internal client error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout { timeout_ms: 0 }
    }
}

/// Error categories for metrics and monitoring
impl ClientError {
    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::Connection(_) => "connection",
            ClientError::InvalidConfig(_) => "configuration",
            ClientError::Broker(_) => "broker",
            ClientError::Timeout { .. } => "timeout",
            ClientError::TopicNotFound { .. } | ClientError::PartitionNotFound { .. } => {
                "not_found"
            }
            ClientError::OffsetOutOfRange { .. } => "offset",
            ClientError::Consumer(_) => "consumer",
            ClientError::Stream(_) => "stream",
            ClientError::InvalidOperation(_) => "invalid_operation",
            ClientError::Internal(_) => "internal",
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Connection(_) | ClientError::Timeout { .. } | ClientError::Broker(_) => {
                true
            }
            ClientError::InvalidConfig(_)
            | ClientError::InvalidOperation(_)
            | ClientError::OffsetOutOfRange { .. } => false,
            _ => false,
        }
    }
}
