//! Machinery shared by every client flavour.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use devprop_stream::{
    Pending, PropertyAccessQuery, PropertyAccessResponse, PropertyStream, PropertyUpdateResponse,
    Provider, Selector, StreamHandler, StreamMiddleware,
};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::targets::{DeliveryTarget, DeliveryTargets};

/// Provider access plus the middleware stack, independent of any
/// concurrency model.
pub(crate) struct ClientCore {
    provider: Arc<dyn Provider>,
    middlewares: Vec<Arc<dyn StreamMiddleware>>,
}

impl ClientCore {
    pub(crate) fn new(provider: Arc<dyn Provider>, config: &ClientConfig) -> Self {
        Self {
            provider,
            middlewares: config.middlewares.clone(),
        }
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub(crate) fn build_query(
        &self,
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
    ) -> PropertyAccessQuery {
        PropertyAccessQuery::new(device, property, selector)
    }

    pub(crate) fn get(&self, query: &PropertyAccessQuery) -> Pending<PropertyAccessResponse> {
        tracing::debug!("Requesting {}", query);
        self.provider.get_property(query)
    }

    pub(crate) fn set(
        &self,
        query: &PropertyAccessQuery,
        value: Value,
    ) -> Result<Pending<PropertyUpdateResponse>> {
        let fields = self.provider.prepare_value_for_set(query, value)?;
        tracing::debug!("Setting {}", query);
        Ok(self.provider.set_property(query, fields))
    }

    /// The provider's stream for `query`, wrapped by every middleware in order.
    pub(crate) fn create_property_stream(
        &self,
        query: &PropertyAccessQuery,
    ) -> Arc<dyn PropertyStream> {
        let stream = self
            .middlewares
            .iter()
            .fold(self.provider.create_property_stream(query), |stream, middleware| {
                middleware.wrap_stream(stream)
            });
        tracing::debug!(
            "Created stream for {} through {} middleware(s)",
            query,
            self.middlewares.len()
        );
        stream
    }
}

/// Per-subscription state shared by every subscription flavour.
///
/// The subscription's [`DeliveryTargets`] is the handler registered on the
/// stream. Each successful `start` is counted, and dropping the subscription
/// issues one `stop` for each that is still outstanding.
pub(crate) struct SubscriptionCore<T: DeliveryTarget> {
    query: PropertyAccessQuery,
    stream: Arc<dyn PropertyStream>,
    targets: Arc<DeliveryTargets<T>>,
    active_starts: Mutex<usize>,
}

impl<T: DeliveryTarget> SubscriptionCore<T> {
    pub(crate) fn new(query: PropertyAccessQuery, stream: Arc<dyn PropertyStream>) -> Self {
        Self {
            query,
            stream,
            targets: Arc::new(DeliveryTargets::new()),
            active_starts: Mutex::new(0),
        }
    }

    pub(crate) fn query(&self) -> &PropertyAccessQuery {
        &self.query
    }

    pub(crate) fn targets(&self) -> &Arc<DeliveryTargets<T>> {
        &self.targets
    }

    fn handler(&self) -> Arc<dyn StreamHandler> {
        Arc::clone(&self.targets) as Arc<dyn StreamHandler>
    }

    pub(crate) fn start(&self) {
        let mut starts = self.active_starts.lock();
        self.stream.start(&self.handler());
        *starts += 1;
        tracing::debug!("Started subscription to {} ({} active)", self.query, *starts);
    }

    pub(crate) fn stop(&self) -> Result<()> {
        let mut starts = self.active_starts.lock();
        self.stream.stop(&self.handler())?;
        *starts = starts.saturating_sub(1);
        tracing::debug!("Stopped subscription to {} ({} active)", self.query, *starts);
        Ok(())
    }

    pub(crate) fn is_started(&self) -> bool {
        *self.active_starts.lock() > 0
    }
}

impl<T: DeliveryTarget> Drop for SubscriptionCore<T> {
    fn drop(&mut self) {
        let outstanding = std::mem::take(self.active_starts.get_mut());
        if outstanding == 0 {
            return;
        }
        let handler = self.handler();
        for _ in 0..outstanding {
            if let Err(e) = self.stream.stop(&handler) {
                tracing::warn!("Failed to stop subscription to {} on drop: {}", self.query, e);
                break;
            }
        }
        tracing::debug!("Released subscription to {}", self.query);
    }
}
