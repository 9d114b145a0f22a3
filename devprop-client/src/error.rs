use devprop_stream::StreamError;
use thiserror::Error;

/// Errors that can occur in the devprop clients
#[derive(Error, Debug)]
pub enum ClientError {
    /// Error raised by a stream, middleware or pending result
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Invalid client configuration
    #[error("Invalid client configuration: {0}")]
    Configuration(String),

    /// The callback worker pool could not be started or rejected a job
    #[error("Callback worker pool error: {0}")]
    WorkerPool(String),

    /// The callback worker pool has shut down
    #[error("Callback worker pool has shut down")]
    WorkerDisconnected,
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
