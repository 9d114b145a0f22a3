//! # devprop-client
//!
//! Read, write and subscribe to device properties through a single
//! abstraction, in whichever concurrency model the caller prefers.
//!
//! ## Overview
//!
//! Three client flavours share one engine:
//!
//! - [`BlockingClient`]: calls block; subscriptions are blocking queues
//! - [`CallbackClient`]: results and updates are handed to callbacks on a
//!   worker pool
//! - [`AsyncClient`]: results are awaited; subscriptions are async queues
//!
//! Every client is backed by a [`Provider`], which supplies get/set results and
//! the stream each subscription attaches to. Middlewares from the
//! [`ClientConfig`] wrap each stream as it is created.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use devprop_client::{BlockingClient, ClientConfig, SynchronizerMiddleware};
//!
//! let sync = SynchronizerMiddleware::new();
//! let config = ClientConfig::new().with_middleware(sync);
//! let client = BlockingClient::with_config(provider, config)?;
//!
//! let bpm = client.subscribe("some-device", "BPM", "");
//! let bct = client.subscribe("some-device", "BCT", "");
//! bpm.start();
//! bct.start();
//!
//! // Updates from both subscriptions, released together per round.
//! for update in client.subscriptions().enable() {
//!     println!("{}", update);
//! }
//! ```
//!
//! ## Lifecycle
//!
//! A subscription moves `created → started → stopped` and may be started
//! again. `stop()` without a matching `start()` is an error. Dropping a
//! subscription stops it as many times as it is still started, so providers
//! can release their data sources. Updates are queued only while an enable
//! scope is alive.

mod async_client;
mod base;
mod blocking;
mod callback;
mod config;
mod error;
pub mod logging;
mod targets;
mod workers;

pub use async_client::{
    AsyncClient, AsyncScope, AsyncSubscription, AsyncSubscriptionPool, AsyncUpdateQueue,
};
pub use blocking::{
    BlockingClient, BlockingScope, BlockingSubscription, BlockingSubscriptionPool, TimeoutIter,
    TryIter, UpdateQueue,
};
pub use callback::{
    CallbackClient, CallbackPoolScope, CallbackSubscription, CallbackSubscriptionPool,
    UpdateCallback,
};
pub use config::ClientConfig;
pub use error::{ClientError, Result};

// Re-export the stream layer so applications depend on one crate
pub use devprop_stream::{
    AcquiredPropertyData, FnMiddleware, Header, NoopMiddleware, Pending, PropertyAccessError,
    PropertyAccessQuery, PropertyAccessResponse, PropertyStream, PropertyUpdateResponse, Provider,
    Selector, StreamChain, StreamError, StreamMiddleware, StreamUpdate, SynchronizerConfig,
    SynchronizerMiddleware, UpdateHeader,
};
