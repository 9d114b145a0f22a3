//! Property streams and the handler registry they broadcast through.
//!
//! A [`PropertyStream`] is one continuous source of updates. Anything that
//! wants those updates implements [`StreamHandler`] and registers itself with
//! [`PropertyStream::start`]. Streams only hold weak references to their
//! handlers: a handler dropped elsewhere silently stops receiving updates.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{Result, StreamError};
use crate::response::PropertyAccessResponse;

/// The shared, immutable payload broadcast to every handler.
pub type StreamUpdate = Arc<PropertyAccessResponse>;

/// Receiver of stream updates.
///
/// Subscriptions and stream chains are both handlers. Implementations are
/// called from whichever thread the provider delivers on and should return
/// quickly.
pub trait StreamHandler: Send + Sync {
    fn response_received(&self, update: &StreamUpdate);
}

/// A continuous source of property updates.
///
/// Every implementation, including middleware chains, exposes the same
/// start/stop/deliver contract so that streams compose.
pub trait PropertyStream: Send + Sync {
    /// Register a handler for future broadcasts.
    ///
    /// Registering the same handler twice registers it twice.
    fn start(&self, handler: &Arc<dyn StreamHandler>);

    /// Remove one registration of a handler.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::HandlerNotRegistered`] if there is no matching
    /// registration.
    fn stop(&self, handler: &Arc<dyn StreamHandler>) -> Result<()>;

    /// Push a new update into the stream. Called by the owning source.
    fn deliver(&self, update: StreamUpdate);
}

// ============================================================================
// HandlerSet - weak, snapshot-broadcast handler registry
// ============================================================================

/// Registry of weakly-held stream handlers.
///
/// This is the building block for every stream implementation, including
/// streams defined by providers that need to react to start/stop.
///
/// Broadcasts iterate a point-in-time snapshot, so handlers may start or stop
/// (on this or another thread) while a broadcast is running. A panic inside a
/// handler is logged and does not prevent delivery to the others.
#[derive(Default)]
pub struct HandlerSet {
    handlers: RwLock<Vec<Weak<dyn StreamHandler>>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration for `handler`.
    pub fn register(&self, handler: &Arc<dyn StreamHandler>) {
        let mut handlers = self.handlers.write();
        handlers.retain(|weak| weak.strong_count() > 0);
        handlers.push(Arc::downgrade(handler));
        tracing::trace!("Registered stream handler, {} now live", handlers.len());
    }

    /// Remove one registration of `handler`.
    pub fn unregister(&self, handler: &Arc<dyn StreamHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        let position = handlers
            .iter()
            .position(|weak| is_same_handler(weak, handler))
            .ok_or(StreamError::HandlerNotRegistered)?;
        handlers.remove(position);
        handlers.retain(|weak| weak.strong_count() > 0);
        tracing::trace!("Unregistered stream handler, {} still live", handlers.len());
        Ok(())
    }

    /// Whether `handler` currently has at least one registration.
    pub fn contains(&self, handler: &Arc<dyn StreamHandler>) -> bool {
        self.handlers
            .read()
            .iter()
            .any(|weak| is_same_handler(weak, handler))
    }

    /// Deliver `update` to every live handler.
    pub fn broadcast(&self, update: &StreamUpdate) {
        let snapshot: Vec<Weak<dyn StreamHandler>> = self.handlers.read().clone();
        for weak in snapshot {
            let Some(handler) = weak.upgrade() else {
                continue;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.response_received(update);
            }));
            if outcome.is_err() {
                tracing::error!(
                    "Stream handler panicked while receiving an update for {}, continuing broadcast",
                    update.query()
                );
            }
        }
    }

    /// Number of registrations whose handler is still alive.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("live_handlers", &self.len())
            .finish()
    }
}

fn is_same_handler(weak: &Weak<dyn StreamHandler>, handler: &Arc<dyn StreamHandler>) -> bool {
    std::ptr::eq(
        weak.as_ptr() as *const (),
        Arc::as_ptr(handler) as *const (),
    )
}

// ============================================================================
// BroadcastStream - the plain stream
// ============================================================================

/// A stream with no behaviour beyond broadcasting to its handlers.
///
/// Providers whose data source does not need to react to start/stop can hand
/// these out directly and call [`PropertyStream::deliver`] as data arrives.
#[derive(Debug, Default)]
pub struct BroadcastStream {
    handlers: HandlerSet,
}

impl BroadcastStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live handler registrations.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl PropertyStream for BroadcastStream {
    fn start(&self, handler: &Arc<dyn StreamHandler>) {
        self.handlers.register(handler);
    }

    fn stop(&self, handler: &Arc<dyn StreamHandler>) -> Result<()> {
        self.handlers.unregister(handler)
    }

    fn deliver(&self, update: StreamUpdate) {
        self.handlers.broadcast(&update);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::query::PropertyAccessQuery;
    use crate::response::AcquiredPropertyData;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Handler recording every update it receives.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) seen: Mutex<Vec<StreamUpdate>>,
    }

    impl Recorder {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn params(&self) -> Vec<i64> {
            self.seen
                .lock()
                .iter()
                .filter_map(|u| u.value().ok()?.get("param")?.as_i64())
                .collect()
        }
    }

    impl StreamHandler for Recorder {
        fn response_received(&self, update: &StreamUpdate) {
            self.seen.lock().push(Arc::clone(update));
        }
    }

    pub(crate) fn update(param: i64) -> StreamUpdate {
        Arc::new(crate::response::PropertyAccessResponse::success(
            PropertyAccessQuery::new("dev", "prop", ""),
            AcquiredPropertyData::from_json(json!({ "param": param })),
        ))
    }

    pub(crate) fn as_handler(recorder: &Arc<Recorder>) -> Arc<dyn StreamHandler> {
        Arc::clone(recorder) as Arc<dyn StreamHandler>
    }

    struct Panicker;

    impl StreamHandler for Panicker {
        fn response_received(&self, _update: &StreamUpdate) {
            panic!("handler failure");
        }
    }

    #[test]
    fn test_broadcast_reaches_every_handler_once() {
        let stream = BroadcastStream::new();
        let a = Recorder::new();
        let b = Recorder::new();
        stream.start(&as_handler(&a));
        stream.start(&as_handler(&b));

        stream.deliver(update(1));
        stream.deliver(update(2));

        assert_eq!(a.params(), vec![1, 2]);
        assert_eq!(b.params(), vec![1, 2]);
    }

    #[test]
    fn test_update_is_shared_not_copied() {
        let stream = BroadcastStream::new();
        let a = Recorder::new();
        let b = Recorder::new();
        stream.start(&as_handler(&a));
        stream.start(&as_handler(&b));

        let sent = update(42);
        stream.deliver(Arc::clone(&sent));

        assert!(Arc::ptr_eq(&a.seen.lock()[0], &sent));
        assert!(Arc::ptr_eq(&b.seen.lock()[0], &sent));
    }

    #[test]
    fn test_stop_without_start_fails() {
        let stream = BroadcastStream::new();
        let recorder = Recorder::new();
        assert_eq!(
            stream.stop(&as_handler(&recorder)),
            Err(StreamError::HandlerNotRegistered)
        );
    }

    #[test]
    fn test_double_start_registers_twice() {
        let stream = BroadcastStream::new();
        let recorder = Recorder::new();
        let handler = as_handler(&recorder);
        stream.start(&handler);
        stream.start(&handler);
        assert_eq!(stream.handler_count(), 2);

        stream.deliver(update(1));
        assert_eq!(recorder.params(), vec![1, 1]);

        stream.stop(&handler).unwrap();
        stream.stop(&handler).unwrap();
        assert_eq!(stream.stop(&handler), Err(StreamError::HandlerNotRegistered));
    }

    #[test]
    fn test_dropped_handler_is_excluded() {
        let stream = BroadcastStream::new();
        let kept = Recorder::new();
        stream.start(&as_handler(&kept));
        {
            let dropped = Recorder::new();
            stream.start(&as_handler(&dropped));
            assert_eq!(stream.handler_count(), 2);
        }
        assert_eq!(stream.handler_count(), 1);

        stream.deliver(update(5));
        assert_eq!(kept.params(), vec![5]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let stream = BroadcastStream::new();
        let before = Recorder::new();
        let panicker: Arc<dyn StreamHandler> = Arc::new(Panicker);
        let after = Recorder::new();
        stream.start(&as_handler(&before));
        stream.start(&panicker);
        stream.start(&as_handler(&after));

        stream.deliver(update(3));

        assert_eq!(before.params(), vec![3]);
        assert_eq!(after.params(), vec![3]);
    }

    #[test]
    fn test_stop_then_start_skips_updates_in_between() {
        let stream = BroadcastStream::new();
        let recorder = Recorder::new();
        let handler = as_handler(&recorder);

        stream.start(&handler);
        stream.deliver(update(1));
        stream.stop(&handler).unwrap();
        stream.deliver(update(2));
        stream.start(&handler);
        stream.deliver(update(3));

        assert_eq!(recorder.params(), vec![1, 3]);
    }

    #[test]
    fn test_concurrent_start_stop_during_broadcast() {
        let stream = Arc::new(BroadcastStream::new());
        let steady = Recorder::new();
        stream.start(&as_handler(&steady));

        let churn = {
            let stream = Arc::clone(&stream);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let transient = Recorder::new();
                    let handler = as_handler(&transient);
                    stream.start(&handler);
                    stream.stop(&handler).unwrap();
                }
            })
        };

        for i in 0..500 {
            stream.deliver(update(i));
        }
        churn.join().unwrap();

        assert_eq!(steady.params(), (0..500).collect::<Vec<_>>());
    }
}
