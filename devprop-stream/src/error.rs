//! Error types for the devprop-stream crate.

/// Errors raised by streams, middlewares and pending results.
///
/// Access failures reported by a provider are not represented here: they
/// travel as data inside [`PropertyAccessResponse`](crate::PropertyAccessResponse)
/// and [`PropertyUpdateResponse`](crate::PropertyUpdateResponse).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// `stop()` was called for a handler with no matching `start()`
    #[error("Stream handler is not registered on this stream")]
    HandlerNotRegistered,

    /// The completing side of a pending result was dropped before resolving it
    #[error("Pending result was abandoned by its provider")]
    Abandoned,

    /// A value handed to a set request could not be converted
    #[error("Invalid value for set: {0}")]
    InvalidValue(String),
}

/// Convenience type alias for Results using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
