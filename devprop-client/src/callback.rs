//! Callback client: results and updates are handed to callbacks running on
//! the client's worker pool.
//!
//! Nothing here blocks the calling thread or the thread a provider delivers
//! on. Callbacks run on `ClientConfig::callback_workers` threads (one by
//! default, so callbacks never overlap). Subscriptions only reference the pool
//! weakly: once the client is dropped, no further callbacks are scheduled.

use std::sync::{Arc, Weak};

use serde_json::Value;

use devprop_stream::{
    PropertyAccessQuery, PropertyAccessResponse, PropertyUpdateResponse, Provider, Selector,
    StreamUpdate,
};

use crate::base::{ClientCore, SubscriptionCore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::targets::{DeliveryTarget, Enabled, Members};
use crate::workers::{CompletionDispatcher, WorkerPool};

/// Callback invoked with each stream update
pub type UpdateCallback = dyn Fn(StreamUpdate) + Send + Sync + 'static;

/// Delivery target scheduling a callback on the worker pool.
#[derive(Clone)]
pub(crate) struct CallbackTarget {
    callback: Arc<UpdateCallback>,
    workers: Weak<WorkerPool>,
}

impl DeliveryTarget for CallbackTarget {
    fn deliver(&self, update: &StreamUpdate) -> bool {
        let Some(workers) = self.workers.upgrade() else {
            tracing::trace!("Client dropped, not scheduling callback for {}", update.query());
            return false;
        };
        let callback = Arc::clone(&self.callback);
        let update = Arc::clone(update);
        let query = update.query().clone();
        match workers.submit(Box::new(move || callback(update))) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping update for {}: {}", query, e);
                true
            }
        }
    }
}

/// A subscription whose updates are passed to a callback.
///
/// The callback receives updates between [`start`](Self::start) and
/// [`stop`](Self::stop); no enable scope is needed.
pub struct CallbackSubscription {
    core: SubscriptionCore<CallbackTarget>,
}

impl CallbackSubscription {
    pub fn query(&self) -> &PropertyAccessQuery {
        self.core.query()
    }

    pub fn start(&self) {
        self.core.start();
    }

    /// Undo one [`start`](Self::start). Callbacks already queued still run.
    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }
}

impl std::fmt::Debug for CallbackSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSubscription")
            .field("query", self.core.query())
            .field("started", &self.core.is_started())
            .finish()
    }
}

/// Scope during which a pool-level callback receives every member's updates.
#[must_use = "the pool callback is only registered while the scope is alive"]
pub struct CallbackPoolScope {
    _enabled: Enabled<CallbackTarget>,
}

/// Every subscription of a [`CallbackClient`].
pub struct CallbackSubscriptionPool {
    members: Members<CallbackTarget>,
    workers: Weak<WorkerPool>,
}

impl CallbackSubscriptionPool {
    /// Also pass every member's updates to `callback` until the scope is dropped.
    ///
    /// Membership is fixed when the scope is created.
    pub fn enable<F>(&self, callback: F) -> CallbackPoolScope
    where
        F: Fn(StreamUpdate) + Send + Sync + 'static,
    {
        let target = CallbackTarget {
            callback: Arc::new(callback),
            workers: Weak::clone(&self.workers),
        };
        let members = self.members.live();
        let enabled = Enabled::add_to(&members, &target);
        tracing::debug!("Enabled callback pool across {} subscription(s)", enabled.len());
        CallbackPoolScope { _enabled: enabled }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client invoking callbacks on a worker pool when results arrive.
pub struct CallbackClient {
    core: ClientCore,
    subscriptions: CallbackSubscriptionPool,
    // Drop order: stop accepting completions before the workers go away.
    dispatcher: CompletionDispatcher,
    workers: Arc<WorkerPool>,
}

impl CallbackClient {
    /// Create a client with the default configuration (one callback worker).
    pub fn new(provider: Arc<dyn Provider>) -> Result<Self> {
        Self::with_config(provider, ClientConfig::default())
    }

    pub fn with_config(provider: Arc<dyn Provider>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let workers = Arc::new(WorkerPool::new(
            config.callback_workers,
            config.callback_queue_capacity,
        )?);
        let dispatcher = CompletionDispatcher::spawn()?;
        Ok(Self {
            core: ClientCore::new(provider, &config),
            subscriptions: CallbackSubscriptionPool {
                members: Members::new(),
                workers: Arc::downgrade(&workers),
            },
            dispatcher,
            workers,
        })
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        self.core.provider()
    }

    pub fn callback_workers(&self) -> usize {
        self.workers.worker_count()
    }

    /// Read a property; `callback` runs once on the worker pool with the response.
    ///
    /// Returns as soon as the request is issued. If the provider abandons the
    /// request, or the client is dropped before the response arrives, the
    /// callback is never invoked.
    pub fn get<F>(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(PropertyAccessResponse) + Send + 'static,
    {
        let query = self.core.build_query(device, property, selector);
        let pending = self.core.get(&query);
        self.complete_with(query, pending, callback)
    }

    /// Write a property; `callback` runs once on the worker pool with the result.
    ///
    /// Values the provider can not accept are rejected before anything is sent.
    pub fn set<F>(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
        value: Value,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(PropertyUpdateResponse) + Send + 'static,
    {
        let query = self.core.build_query(device, property, selector);
        let pending = self.core.set(&query, value)?;
        self.complete_with(query, pending, callback)
    }

    fn complete_with<T, F>(
        &self,
        query: PropertyAccessQuery,
        pending: devprop_stream::Pending<T>,
        callback: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let workers = Arc::downgrade(&self.workers);
        self.dispatcher.submit(Box::pin(async move {
            let result = match pending.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Request for {} did not complete: {}", query, e);
                    return;
                }
            };
            let Some(workers) = workers.upgrade() else {
                tracing::debug!("Client dropped before {} completed", query);
                return;
            };
            if let Err(e) = workers.submit(Box::new(move || callback(result))) {
                tracing::warn!("Could not schedule callback for {}: {}", query, e);
            }
        }))
    }

    /// Create a subscription passing each update to `callback`.
    ///
    /// Nothing is delivered until the subscription is started.
    pub fn subscribe<F>(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
        callback: F,
    ) -> CallbackSubscription
    where
        F: Fn(StreamUpdate) + Send + Sync + 'static,
    {
        let query = self.core.build_query(device, property, selector);
        let stream = self.core.create_property_stream(&query);
        let core = SubscriptionCore::new(query, stream);
        core.targets().add(CallbackTarget {
            callback: Arc::new(callback),
            workers: Arc::downgrade(&self.workers),
        });
        self.subscriptions.members.push(core.targets());
        CallbackSubscription { core }
    }

    /// The pool of every subscription this client has created.
    pub fn subscriptions(&self) -> &CallbackSubscriptionPool {
        &self.subscriptions
    }
}
