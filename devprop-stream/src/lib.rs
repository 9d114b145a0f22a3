//! # devprop-stream
//!
//! The streaming core of devprop: one continuous source of property updates
//! fanned out to any number of subscribers, plus the middleware chain that
//! sits between a source and its subscribers.
//!
//! ## Overview
//!
//! - **Data model**: [`PropertyAccessQuery`] identifies a request,
//!   [`PropertyAccessResponse`] carries exactly one of a value or an access error.
//! - **Streams**: [`PropertyStream`] broadcasts each update to every registered
//!   [`StreamHandler`]. Handlers are held weakly.
//! - **Middleware**: [`StreamMiddleware::wrap_stream`] decorates a stream;
//!   [`StreamChain`] applies a processing function and is itself a stream.
//! - **Synchronizer**: [`SynchronizerMiddleware`] holds back updates from several
//!   streams until each has produced one, then releases them together.
//! - **Provider**: the [`Provider`] trait is what a device-access backend
//!   implements to plug into the clients.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use devprop_stream::{
//!     AcquiredPropertyData, BroadcastStream, PropertyAccessQuery, PropertyAccessResponse,
//!     PropertyStream, StreamHandler, StreamUpdate,
//! };
//! use serde_json::json;
//!
//! struct Printer;
//!
//! impl StreamHandler for Printer {
//!     fn response_received(&self, update: &StreamUpdate) {
//!         println!("{}", update);
//!     }
//! }
//!
//! let stream = BroadcastStream::new();
//! let handler: Arc<dyn StreamHandler> = Arc::new(Printer);
//! stream.start(&handler);
//!
//! let query = PropertyAccessQuery::new("dev", "prop", "");
//! stream.deliver(Arc::new(PropertyAccessResponse::success(
//!     query,
//!     AcquiredPropertyData::from_json(json!({ "param": 42 })),
//! )));
//!
//! stream.stop(&handler).unwrap();
//! ```

pub mod error;
pub mod middleware;
pub mod pending;
pub mod provider;
pub mod query;
pub mod response;
pub mod stream;
pub mod synchronizer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export main types for convenience
pub use error::{Result, StreamError};
pub use middleware::{FnMiddleware, NoopMiddleware, Processor, StreamChain, StreamMiddleware};
pub use pending::{pending, Completer, Pending};
pub use provider::Provider;
pub use query::{PropertyAccessQuery, Selector};
pub use response::{
    datetime_from_ns, AcquiredPropertyData, FieldMap, Header, PropertyAccessError,
    PropertyAccessResponse, PropertyUpdateResponse, UpdateHeader,
};
pub use stream::{BroadcastStream, HandlerSet, PropertyStream, StreamHandler, StreamUpdate};
pub use synchronizer::{SynchronizerConfig, SynchronizerMiddleware};
