//! Async client: results are awaited and subscriptions are consumed as
//! async queues.
//!
//! Providers may deliver from any thread; updates cross into the consumer's
//! runtime through an unbounded tokio channel, so delivery never blocks and
//! only the awaiting task is suspended.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use devprop_stream::{
    PropertyAccessQuery, PropertyAccessResponse, PropertyUpdateResponse, Provider, Selector,
    StreamUpdate,
};

use crate::base::{ClientCore, SubscriptionCore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::targets::{Enabled, Members};

/// FIFO of updates consumed with `.await`.
pub struct AsyncUpdateQueue {
    tx: UnboundedSender<StreamUpdate>,
    rx: Mutex<UnboundedReceiver<StreamUpdate>>,
}

impl AsyncUpdateQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Wait for the next update.
    ///
    /// Concurrent callers are served one at a time.
    pub async fn next(&self) -> Option<StreamUpdate> {
        self.rx.lock().await.recv().await
    }

    /// Wait for the next update for at most `timeout`.
    pub async fn next_timeout(&self, timeout: Duration) -> Option<StreamUpdate> {
        tokio::time::timeout(timeout, self.next())
            .await
            .ok()
            .flatten()
    }

    /// Take a queued update without waiting.
    ///
    /// Returns `None` if nothing is queued or another task is currently
    /// waiting on the queue.
    pub fn try_next(&self) -> Option<StreamUpdate> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// The queue as a [`Stream`].
    pub fn stream(&self) -> impl Stream<Item = StreamUpdate> + '_ {
        futures::stream::unfold(self, |queue| async move {
            queue.next().await.map(|update| (update, queue))
        })
    }

    fn sender(&self) -> &UnboundedSender<StreamUpdate> {
        &self.tx
    }
}

impl std::fmt::Debug for AsyncUpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncUpdateQueue").finish_non_exhaustive()
    }
}

/// Scope during which updates are delivered into an async queue.
///
/// Dereferences to the [`AsyncUpdateQueue`]. Dropping the scope stops
/// delivery; already queued updates stay.
#[must_use = "updates are only delivered while the scope is alive"]
pub struct AsyncScope<'a> {
    queue: &'a AsyncUpdateQueue,
    _enabled: Enabled<UnboundedSender<StreamUpdate>>,
}

impl Deref for AsyncScope<'_> {
    type Target = AsyncUpdateQueue;

    fn deref(&self) -> &AsyncUpdateQueue {
        self.queue
    }
}

/// A subscription consumed from async code.
pub struct AsyncSubscription {
    core: SubscriptionCore<UnboundedSender<StreamUpdate>>,
    queue: AsyncUpdateQueue,
}

impl AsyncSubscription {
    pub fn query(&self) -> &PropertyAccessQuery {
        self.core.query()
    }

    pub fn start(&self) {
        self.core.start();
    }

    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    /// Deliver into this subscription's queue until the scope is dropped.
    pub fn enable(&self) -> AsyncScope<'_> {
        AsyncScope {
            queue: &self.queue,
            _enabled: Enabled::add_to([self.core.targets()], self.queue.sender()),
        }
    }

    pub fn queue(&self) -> &AsyncUpdateQueue {
        &self.queue
    }
}

impl std::fmt::Debug for AsyncSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSubscription")
            .field("query", self.core.query())
            .field("started", &self.core.is_started())
            .finish()
    }
}

/// Every subscription of an [`AsyncClient`], consumable as one merged queue.
pub struct AsyncSubscriptionPool {
    members: Members<UnboundedSender<StreamUpdate>>,
    queue: AsyncUpdateQueue,
}

impl AsyncSubscriptionPool {
    /// Deliver every member's updates into the pool queue until the scope is
    /// dropped.
    ///
    /// Membership is fixed when the scope is created.
    pub fn enable(&self) -> AsyncScope<'_> {
        let members = self.members.live();
        let enabled = Enabled::add_to(&members, self.queue.sender());
        tracing::debug!("Enabled async pool across {} subscription(s)", enabled.len());
        AsyncScope {
            queue: &self.queue,
            _enabled: enabled,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queue(&self) -> &AsyncUpdateQueue {
        &self.queue
    }
}

/// Client whose requests are awaited.
///
/// Requires no particular executor for `get`/`set`; timeouts on subscription
/// queues need a tokio runtime with the time driver enabled.
pub struct AsyncClient {
    core: ClientCore,
    subscriptions: AsyncSubscriptionPool,
}

impl AsyncClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::build(provider, &ClientConfig::default())
    }

    pub fn with_config(provider: Arc<dyn Provider>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(provider, &config))
    }

    fn build(provider: Arc<dyn Provider>, config: &ClientConfig) -> Self {
        Self {
            core: ClientCore::new(provider, config),
            subscriptions: AsyncSubscriptionPool {
                members: Members::new(),
                queue: AsyncUpdateQueue::new(),
            },
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        self.core.provider()
    }

    pub async fn get(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
    ) -> Result<PropertyAccessResponse> {
        let query = self.core.build_query(device, property, selector);
        Ok(self.core.get(&query).await?)
    }

    pub async fn set(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
        value: Value,
    ) -> Result<PropertyUpdateResponse> {
        let query = self.core.build_query(device, property, selector);
        let pending = self.core.set(&query, value)?;
        Ok(pending.await?)
    }

    /// Create a subscription. It receives nothing until started and enabled.
    pub fn subscribe(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
    ) -> AsyncSubscription {
        let query = self.core.build_query(device, property, selector);
        let stream = self.core.create_property_stream(&query);
        let subscription = AsyncSubscription {
            core: SubscriptionCore::new(query, stream),
            queue: AsyncUpdateQueue::new(),
        };
        self.subscriptions.members.push(subscription.core.targets());
        subscription
    }

    pub fn subscriptions(&self) -> &AsyncSubscriptionPool {
        &self.subscriptions
    }
}
