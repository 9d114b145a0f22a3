//! Stream middleware: processing stages between a stream and its handlers.
//!
//! A middleware's only extension point is [`StreamMiddleware::wrap_stream`].
//! Transforming middlewares return a [`StreamChain`], which is itself a
//! [`PropertyStream`], so chains nest to any depth.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Result;
use crate::stream::{HandlerSet, PropertyStream, StreamHandler, StreamUpdate};

/// Processing function applied by a [`StreamChain`] to every update.
///
/// Returning `None` suppresses the update.
pub type Processor = dyn Fn(&StreamUpdate) -> Option<StreamUpdate> + Send + Sync;

/// A mechanism to add processing before data arrives at a subscription.
///
/// Middlewares are applied in order at subscription-creation time, each one
/// wrapping the stream produced by the previous one.
pub trait StreamMiddleware: Send + Sync {
    /// Wrap `stream`, returning the stream subscriptions should attach to.
    ///
    /// The default implementation is a no-op.
    fn wrap_stream(&self, stream: Arc<dyn PropertyStream>) -> Arc<dyn PropertyStream> {
        stream
    }
}

/// Middleware which leaves streams untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl StreamMiddleware for NoopMiddleware {}

// ============================================================================
// StreamChain
// ============================================================================

/// A non-leaf stage of stream processing.
///
/// Every downstream `start` registers the handler locally; the chain itself is
/// registered on its upstream once, when its first handler starts, and removed
/// again when the last handler stops. The upstream only holds the chain
/// weakly, so dropping the chain detaches it.
pub struct StreamChain {
    upstream: Arc<dyn PropertyStream>,
    processor: Box<Processor>,
    handlers: HandlerSet,
    // Whether the chain is registered upstream. Guards both transitions.
    attached: Mutex<bool>,
    this: Weak<StreamChain>,
}

impl StreamChain {
    /// Create a chain applying `processor` to every update from `upstream`.
    pub fn new<F>(upstream: Arc<dyn PropertyStream>, processor: F) -> Arc<Self>
    where
        F: Fn(&StreamUpdate) -> Option<StreamUpdate> + Send + Sync + 'static,
    {
        Arc::new_cyclic(|this| Self {
            upstream,
            processor: Box::new(processor),
            handlers: HandlerSet::new(),
            attached: Mutex::new(false),
            this: this.clone(),
        })
    }

    /// The stream this chain wraps.
    pub fn upstream(&self) -> &Arc<dyn PropertyStream> {
        &self.upstream
    }

    /// Broadcast `update` to this chain's handlers, bypassing the processor.
    pub fn broadcast(&self, update: &StreamUpdate) {
        self.handlers.broadcast(update);
    }

    /// Number of live downstream registrations.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn as_handler(&self) -> Option<Arc<dyn StreamHandler>> {
        self.this
            .upgrade()
            .map(|chain| chain as Arc<dyn StreamHandler>)
    }
}

impl StreamHandler for StreamChain {
    fn response_received(&self, update: &StreamUpdate) {
        if let Some(processed) = (self.processor)(update) {
            self.handlers.broadcast(&processed);
        }
    }
}

impl PropertyStream for StreamChain {
    fn start(&self, handler: &Arc<dyn StreamHandler>) {
        let mut attached = self.attached.lock();
        self.handlers.register(handler);
        if *attached {
            return;
        }
        if let Some(me) = self.as_handler() {
            self.upstream.start(&me);
            *attached = true;
            tracing::trace!("Chain attached to upstream");
        }
    }

    fn stop(&self, handler: &Arc<dyn StreamHandler>) -> Result<()> {
        let mut attached = self.attached.lock();
        self.handlers.unregister(handler)?;
        if !*attached || !self.handlers.is_empty() {
            return Ok(());
        }
        if let Some(me) = self.as_handler() {
            self.upstream.stop(&me)?;
            *attached = false;
            tracing::trace!("Chain detached from upstream");
        }
        Ok(())
    }

    fn deliver(&self, update: StreamUpdate) {
        self.response_received(&update);
    }
}

impl std::fmt::Debug for StreamChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChain")
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FnMiddleware
// ============================================================================

/// Middleware built from a processing closure.
///
/// Each wrapped stream gets its own [`StreamChain`]; all chains share the
/// closure.
///
/// # Example
///
/// ```rust
/// use devprop_stream::FnMiddleware;
///
/// // Drop every update carrying an access error.
/// let only_values = FnMiddleware::filter(|update| update.is_ok());
/// ```
#[derive(Clone)]
pub struct FnMiddleware {
    processor: Arc<Processor>,
}

impl FnMiddleware {
    /// Middleware applying `processor` to every update.
    pub fn new<F>(processor: F) -> Self
    where
        F: Fn(&StreamUpdate) -> Option<StreamUpdate> + Send + Sync + 'static,
    {
        Self {
            processor: Arc::new(processor),
        }
    }

    /// Middleware forwarding only updates matching `predicate`.
    pub fn filter<F>(predicate: F) -> Self
    where
        F: Fn(&StreamUpdate) -> bool + Send + Sync + 'static,
    {
        Self::new(move |update| predicate(update).then(|| Arc::clone(update)))
    }

    /// Middleware replacing every update with the output of `map`.
    pub fn map<F>(map: F) -> Self
    where
        F: Fn(&StreamUpdate) -> StreamUpdate + Send + Sync + 'static,
    {
        Self::new(move |update| Some(map(update)))
    }
}

impl StreamMiddleware for FnMiddleware {
    fn wrap_stream(&self, stream: Arc<dyn PropertyStream>) -> Arc<dyn PropertyStream> {
        let processor = Arc::clone(&self.processor);
        StreamChain::new(stream, move |update| processor(update))
    }
}

impl std::fmt::Debug for FnMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::stream::tests::{as_handler, update, Recorder};
    use crate::stream::BroadcastStream;

    fn root() -> (Arc<BroadcastStream>, Arc<dyn PropertyStream>) {
        let root = Arc::new(BroadcastStream::new());
        let dyn_root: Arc<dyn PropertyStream> = Arc::clone(&root) as Arc<dyn PropertyStream>;
        (root, dyn_root)
    }

    #[test]
    fn test_noop_middleware_returns_same_stream() {
        let (_, stream) = root();
        let wrapped = NoopMiddleware.wrap_stream(Arc::clone(&stream));
        assert!(Arc::ptr_eq(&stream, &wrapped));
    }

    #[test]
    fn test_noop_middleware_is_transparent() {
        let (plain_root, plain) = root();
        let (wrapped_root, wrapped) = root();
        let wrapped = NoopMiddleware.wrap_stream(wrapped);

        let a = Recorder::new();
        let b = Recorder::new();
        plain.start(&as_handler(&a));
        wrapped.start(&as_handler(&b));

        for i in 0..5 {
            plain_root.deliver(update(i));
            wrapped_root.deliver(update(i));
        }
        assert_eq!(a.params(), b.params());
        assert_eq!(plain_root.handler_count(), wrapped_root.handler_count());
    }

    #[test]
    fn test_chain_transforms_updates() {
        let (root_stream, upstream) = root();
        let chain = StreamChain::new(upstream, |u| {
            let param = u.value().ok()?.get("param")?.as_i64()?;
            Some(update(param * 10))
        });
        let recorder = Recorder::new();
        chain.start(&as_handler(&recorder));

        root_stream.deliver(update(1));
        root_stream.deliver(update(2));

        assert_eq!(recorder.params(), vec![10, 20]);
    }

    #[test]
    fn test_chain_suppresses_none() {
        let (root_stream, upstream) = root();
        let chain = FnMiddleware::filter(|u| {
            u.value()
                .ok()
                .and_then(|v| v.get("param"))
                .and_then(|p| p.as_i64())
                .is_some_and(|p| p % 2 == 0)
        })
        .wrap_stream(upstream);
        let recorder = Recorder::new();
        chain.start(&as_handler(&recorder));

        for i in 0..6 {
            root_stream.deliver(update(i));
        }
        assert_eq!(recorder.params(), vec![0, 2, 4]);
    }

    #[test]
    fn test_chain_registers_upstream_once() {
        let (root_stream, upstream) = root();
        let chain = StreamChain::new(upstream, |u| Some(Arc::clone(u)));
        let a = Recorder::new();
        let b = Recorder::new();

        chain.start(&as_handler(&a));
        chain.start(&as_handler(&b));
        assert_eq!(root_stream.handler_count(), 1);
        assert_eq!(chain.handler_count(), 2);

        chain.stop(&as_handler(&a)).unwrap();
        assert_eq!(root_stream.handler_count(), 1);
        chain.stop(&as_handler(&b)).unwrap();
        assert_eq!(root_stream.handler_count(), 0);

        chain.start(&as_handler(&a));
        assert_eq!(root_stream.handler_count(), 1);
    }

    #[test]
    fn test_each_chain_handler_receives_update_once() {
        let (root_stream, upstream) = root();
        let chain = FnMiddleware::map(|u| Arc::clone(u)).wrap_stream(upstream);
        let a = Recorder::new();
        let b = Recorder::new();
        chain.start(&as_handler(&a));
        chain.start(&as_handler(&b));

        root_stream.deliver(update(1));
        assert_eq!(a.params(), vec![1]);
        assert_eq!(b.params(), vec![1]);

        chain.stop(&as_handler(&a)).unwrap();
        root_stream.deliver(update(2));
        assert_eq!(a.params(), vec![1]);
        assert_eq!(b.params(), vec![1, 2]);
    }

    #[test]
    fn test_nested_chain_handlers_receive_update_once() {
        let (root_stream, upstream) = root();
        let pass = FnMiddleware::map(|u| Arc::clone(u));
        let outer = pass.wrap_stream(pass.wrap_stream(upstream));
        let a = Recorder::new();
        let b = Recorder::new();
        outer.start(&as_handler(&a));
        outer.start(&as_handler(&b));
        assert_eq!(root_stream.handler_count(), 1);

        root_stream.deliver(update(5));
        assert_eq!(a.params(), vec![5]);
        assert_eq!(b.params(), vec![5]);

        outer.stop(&as_handler(&a)).unwrap();
        outer.stop(&as_handler(&b)).unwrap();
        assert_eq!(root_stream.handler_count(), 0);
    }

    #[test]
    fn test_same_handler_started_twice_on_chain() {
        let (root_stream, upstream) = root();
        let chain = StreamChain::new(upstream, |u| Some(Arc::clone(u)));
        let a = Recorder::new();
        chain.start(&as_handler(&a));
        chain.start(&as_handler(&a));

        chain.stop(&as_handler(&a)).unwrap();
        assert_eq!(root_stream.handler_count(), 1);
        root_stream.deliver(update(3));
        assert_eq!(a.params(), vec![3]);

        chain.stop(&as_handler(&a)).unwrap();
        assert_eq!(root_stream.handler_count(), 0);
    }

    #[test]
    fn test_chain_stop_without_start_fails() {
        let (root_stream, upstream) = root();
        let chain = StreamChain::new(upstream, |u| Some(Arc::clone(u)));
        let recorder = Recorder::new();
        assert_eq!(
            chain.stop(&as_handler(&recorder)),
            Err(StreamError::HandlerNotRegistered)
        );
        assert_eq!(root_stream.handler_count(), 0);
    }

    #[test]
    fn test_dropped_chain_detaches_from_upstream() {
        let (root_stream, upstream) = root();
        let recorder = Recorder::new();
        {
            let chain = StreamChain::new(upstream, |u| Some(Arc::clone(u)));
            chain.start(&as_handler(&recorder));
            assert_eq!(root_stream.handler_count(), 1);
        }
        assert_eq!(root_stream.handler_count(), 0);
        root_stream.deliver(update(1));
        assert!(recorder.params().is_empty());
    }

    #[test]
    fn test_chains_nest() {
        let (root_stream, upstream) = root();
        let add_one = FnMiddleware::map(|u| {
            let p = u.value().ok().and_then(|v| v.get("param")).and_then(|p| p.as_i64());
            update(p.unwrap_or_default() + 1)
        });
        let inner = add_one.wrap_stream(upstream);
        let outer = add_one.wrap_stream(inner);
        let recorder = Recorder::new();
        outer.start(&as_handler(&recorder));

        root_stream.deliver(update(1));
        assert_eq!(recorder.params(), vec![3]);

        outer.stop(&as_handler(&recorder)).unwrap();
        assert_eq!(root_stream.handler_count(), 0);
    }
}
