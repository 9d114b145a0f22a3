//! Configuration shared by every client flavour.

use std::fmt;
use std::sync::Arc;

use devprop_stream::StreamMiddleware;

use crate::error::{ClientError, Result};

/// Configuration for a client
///
/// Middlewares are applied in order when a subscription is created: the
/// first entry wraps the provider's stream, the next wraps the result, and so
/// on outward.
#[derive(Clone)]
pub struct ClientConfig {
    /// Number of threads running callbacks for the callback client
    /// Default: 1 (callbacks never run concurrently)
    pub callback_workers: usize,

    /// Maximum number of callbacks waiting for a worker
    /// Default: None (unbounded)
    pub callback_queue_capacity: Option<usize>,

    /// Stream middlewares, innermost first
    /// Default: empty
    pub middlewares: Vec<Arc<dyn StreamMiddleware>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            callback_workers: 1,
            callback_queue_capacity: None,
            middlewares: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Create a new ClientConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ClientConfig running callbacks on one worker per available core
    ///
    /// Callbacks must be thread-safe with respect to each other.
    pub fn parallel_callbacks() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            callback_workers: workers,
            ..Default::default()
        }
    }

    /// Create a ClientConfig that sheds callback load instead of queueing it
    pub fn bounded_callbacks(capacity: usize) -> Self {
        Self {
            callback_queue_capacity: Some(capacity),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.callback_workers == 0 {
            return Err(ClientError::Configuration(
                "Callback workers must be greater than 0".to_string(),
            ));
        }

        if self.callback_queue_capacity == Some(0) {
            return Err(ClientError::Configuration(
                "Callback queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_callback_workers(mut self, workers: usize) -> Self {
        self.callback_workers = workers;
        self
    }

    pub fn with_callback_queue_capacity(mut self, capacity: usize) -> Self {
        self.callback_queue_capacity = Some(capacity);
        self
    }

    /// Append a middleware; it wraps every middleware added before it.
    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: StreamMiddleware + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append a middleware that is shared with other configurations.
    pub fn with_shared_middleware(mut self, middleware: Arc<dyn StreamMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("callback_workers", &self.callback_workers)
            .field("callback_queue_capacity", &self.callback_queue_capacity)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
