//! Blocking client: calls block the calling thread until results arrive.
//!
//! Subscriptions buffer updates in a FIFO queue while enabled. Consumption
//! follows the usual blocking iterator shape: `recv`, `recv_timeout`,
//! `try_recv`, `try_iter`, `timeout_iter`, or plain iteration.
//!
//! ```rust,ignore
//! let client = BlockingClient::new(provider);
//! let subscription = client.subscribe("some-device", "some-property", "");
//! subscription.start();
//!
//! for update in subscription.enable().take(10) {
//!     println!("{}", update);
//! }
//! subscription.stop()?;
//! ```

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use serde_json::Value;

use devprop_stream::{
    PropertyAccessQuery, PropertyAccessResponse, PropertyUpdateResponse, Provider, Selector,
    StreamUpdate,
};

use crate::base::{ClientCore, SubscriptionCore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::targets::{Enabled, Members};

// ============================================================================
// UpdateQueue
// ============================================================================

/// FIFO of updates with blocking consumption.
pub struct UpdateQueue {
    tx: Sender<StreamUpdate>,
    rx: Receiver<StreamUpdate>,
}

impl UpdateQueue {
    fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Block until an update is available
    pub fn recv(&self) -> Option<StreamUpdate> {
        self.rx.recv().ok()
    }

    /// Try to receive an update without blocking
    pub fn try_recv(&self) -> Option<StreamUpdate> {
        self.rx.try_recv().ok()
    }

    /// Block until an update is available or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StreamUpdate> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Get a non-blocking iterator over currently queued updates
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { queue: self }
    }

    /// Get a blocking iterator which ends once `timeout` passes without an update
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            queue: self,
            timeout,
        }
    }

    /// Number of updates waiting to be consumed
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn sender(&self) -> &Sender<StreamUpdate> {
        &self.tx
    }
}

impl std::fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("queued", &self.len())
            .finish()
    }
}

/// Non-blocking iterator over currently queued updates
pub struct TryIter<'a> {
    queue: &'a UpdateQueue,
}

impl Iterator for TryIter<'_> {
    type Item = StreamUpdate;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.try_recv()
    }
}

/// Blocking iterator with timeout
pub struct TimeoutIter<'a> {
    queue: &'a UpdateQueue,
    timeout: Duration,
}

impl Iterator for TimeoutIter<'_> {
    type Item = StreamUpdate;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.recv_timeout(self.timeout)
    }
}

/// Scope during which updates are delivered into a queue.
///
/// Dereferences to the [`UpdateQueue`] and iterates it, blocking on each
/// `next`. Dropping the scope stops delivery; already queued updates stay.
#[must_use = "updates are only delivered while the scope is alive"]
pub struct BlockingScope<'a> {
    queue: &'a UpdateQueue,
    _enabled: Enabled<Sender<StreamUpdate>>,
}

impl Deref for BlockingScope<'_> {
    type Target = UpdateQueue;

    fn deref(&self) -> &UpdateQueue {
        self.queue
    }
}

impl Iterator for BlockingScope<'_> {
    type Item = StreamUpdate;

    /// Block until the next update is available
    fn next(&mut self) -> Option<Self::Item> {
        self.queue.recv()
    }
}

// ============================================================================
// Subscription and pool
// ============================================================================

/// A subscription consumed by blocking the calling thread.
pub struct BlockingSubscription {
    core: SubscriptionCore<Sender<StreamUpdate>>,
    queue: UpdateQueue,
}

impl BlockingSubscription {
    pub fn query(&self) -> &PropertyAccessQuery {
        self.core.query()
    }

    /// Register on the stream. Each call needs its own [`stop`](Self::stop).
    pub fn start(&self) {
        self.core.start();
    }

    /// Undo one [`start`](Self::start).
    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    /// Deliver into this subscription's queue until the scope is dropped.
    pub fn enable(&self) -> BlockingScope<'_> {
        BlockingScope {
            queue: &self.queue,
            _enabled: Enabled::add_to([self.core.targets()], self.queue.sender()),
        }
    }

    /// The queue updates are delivered into.
    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }
}

impl std::fmt::Debug for BlockingSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSubscription")
            .field("query", self.core.query())
            .field("started", &self.core.is_started())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Every subscription of a [`BlockingClient`], consumable as one merged queue.
pub struct BlockingSubscriptionPool {
    members: Members<Sender<StreamUpdate>>,
    queue: UpdateQueue,
}

impl BlockingSubscriptionPool {
    fn new() -> Self {
        Self {
            members: Members::new(),
            queue: UpdateQueue::new(),
        }
    }

    /// Deliver every member's updates into the pool queue until the scope is
    /// dropped.
    ///
    /// Membership is fixed when the scope is created.
    pub fn enable(&self) -> BlockingScope<'_> {
        let members = self.members.live();
        let enabled = Enabled::add_to(&members, self.queue.sender());
        tracing::debug!("Enabled blocking pool across {} subscription(s)", enabled.len());
        BlockingScope {
            queue: &self.queue,
            _enabled: enabled,
        }
    }

    /// Number of subscriptions still alive.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client whose calls block until the provider has answered.
pub struct BlockingClient {
    core: ClientCore,
    subscriptions: BlockingSubscriptionPool,
}

impl BlockingClient {
    /// Create a client with the default configuration.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::build(provider, &ClientConfig::default())
    }

    /// Create a client with a validated configuration.
    pub fn with_config(provider: Arc<dyn Provider>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(provider, &config))
    }

    fn build(provider: Arc<dyn Provider>, config: &ClientConfig) -> Self {
        Self {
            core: ClientCore::new(provider, config),
            subscriptions: BlockingSubscriptionPool::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        self.core.provider()
    }

    /// Read a property, blocking until the provider responds.
    ///
    /// Access failures are reported inside the response.
    pub fn get(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
    ) -> Result<PropertyAccessResponse> {
        let query = self.core.build_query(device, property, selector);
        Ok(self.core.get(&query).wait()?)
    }

    /// Write a property, blocking until the provider responds.
    pub fn set(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
        value: Value,
    ) -> Result<PropertyUpdateResponse> {
        let query = self.core.build_query(device, property, selector);
        Ok(self.core.set(&query, value)?.wait()?)
    }

    /// Create a subscription. It receives nothing until started and enabled.
    pub fn subscribe(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
    ) -> BlockingSubscription {
        let query = self.core.build_query(device, property, selector);
        let stream = self.core.create_property_stream(&query);
        let subscription = BlockingSubscription {
            core: SubscriptionCore::new(query, stream),
            queue: UpdateQueue::new(),
        };
        self.subscriptions.members.push(subscription.core.targets());
        subscription
    }

    /// The pool of every subscription this client has created.
    pub fn subscriptions(&self) -> &BlockingSubscriptionPool {
        &self.subscriptions
    }
}
