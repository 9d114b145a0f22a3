//! Barrier-style synchronization of several independent streams.
//!
//! Every stream wrapped by one [`SynchronizerMiddleware`] takes part in the
//! same barrier. Updates are held back until each wrapped stream has produced
//! one since the last release; then every held update is broadcast on its own
//! stream, in stream-registration order.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use devprop_stream::{BroadcastStream, PropertyStream, StreamMiddleware, SynchronizerMiddleware};
//!
//! let sync = SynchronizerMiddleware::new();
//! let bpm = sync.wrap_stream(Arc::new(BroadcastStream::new()));
//! let bct = sync.wrap_stream(Arc::new(BroadcastStream::new()));
//! assert_eq!(sync.stream_count(), 2);
//! # drop((bpm, bct));
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;
use tracing::{debug, info, warn};

use crate::middleware::{StreamChain, StreamMiddleware};
use crate::stream::{PropertyStream, StreamUpdate};

/// Configuration for a [`SynchronizerMiddleware`].
#[derive(Debug, Clone, Default)]
pub struct SynchronizerConfig {
    /// Maximum age of an incomplete round.
    ///
    /// When set, a round that is still incomplete after this long is discarded
    /// as soon as the next update arrives, and that update starts a new round.
    /// Default: `None` (rounds never expire)
    pub round_timeout: Option<Duration>,
}

impl SynchronizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = Some(timeout);
        self
    }
}

/// Identity of one wrapped stream within a synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StreamKey(u64);

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sync-stream-{}", self.0)
    }
}

#[derive(Default)]
struct RoundState {
    /// Wrapped chains in registration order.
    streams: Vec<(StreamKey, Weak<StreamChain>)>,
    /// Latest unreleased update per stream.
    pending: HashMap<StreamKey, StreamUpdate>,
    round_started: Option<Instant>,
}

impl RoundState {
    fn prune_dropped(&mut self) {
        let before = self.streams.len();
        let pending = &mut self.pending;
        self.streams.retain(|(key, chain)| {
            let alive = chain.strong_count() > 0;
            if !alive {
                pending.remove(key);
            }
            alive
        });
        if self.streams.len() != before {
            debug!(
                "Synchronizer pruned {} dropped stream(s), {} remain",
                before - self.streams.len(),
                self.streams.len()
            );
        }
    }
}

struct Shared {
    // Reentrant so a release which feeds back into this synchronizer on the
    // same thread does not deadlock; the RefCell is never borrowed across a
    // broadcast.
    state: ReentrantMutex<RefCell<RoundState>>,
    next_key: AtomicU64,
    config: SynchronizerConfig,
}

impl Shared {
    fn accumulate(&self, key: StreamKey, update: &StreamUpdate) {
        let guard = self.state.lock();

        let release = {
            let mut state = guard.borrow_mut();
            state.prune_dropped();

            if let (Some(timeout), Some(started)) = (self.config.round_timeout, state.round_started)
            {
                if !state.pending.is_empty() && started.elapsed() > timeout {
                    warn!(
                        "Synchronizer round incomplete after {:?}, discarding {} pending update(s)",
                        timeout,
                        state.pending.len()
                    );
                    state.pending.clear();
                }
            }

            if state.pending.is_empty() {
                state.round_started = Some(Instant::now());
                debug!("Starting new accumulation round");
            }

            if state.pending.insert(key, Arc::clone(update)).is_some() {
                info!(
                    "Dropping existing data for {} before the accumulation is complete, as newer data has arrived",
                    key
                );
            }

            if state.pending.len() < state.streams.len() {
                return;
            }

            debug!("Accumulation is complete, releasing {} update(s)", state.pending.len());
            let RoundState {
                streams, pending, ..
            } = &mut *state;
            let release: Vec<(Arc<StreamChain>, StreamUpdate)> = streams
                .iter()
                .filter_map(|(key, chain)| Some((chain.upgrade()?, pending.remove(key)?)))
                .collect();
            pending.clear();
            state.round_started = None;
            release
        };

        for (chain, update) in release {
            chain.broadcast(&update);
        }
    }
}

/// Middleware aligning updates from several streams into simultaneous releases.
///
/// Pending data is lossy: if a stream delivers twice before the round
/// completes, only its newest update is kept. Streams wrapped while a round is
/// in progress must also contribute before that round completes.
///
/// Handlers attached to synchronized streams are invoked while the
/// synchronizer's lock is held, so releases from different threads never
/// interleave.
#[derive(Clone)]
pub struct SynchronizerMiddleware {
    shared: Arc<Shared>,
}

impl SynchronizerMiddleware {
    pub fn new() -> Self {
        Self::with_config(SynchronizerConfig::default())
    }

    pub fn with_config(config: SynchronizerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: ReentrantMutex::new(RefCell::new(RoundState::default())),
                next_key: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Number of wrapped streams still alive.
    pub fn stream_count(&self) -> usize {
        let guard = self.shared.state.lock();
        let state = guard.borrow();
        state
            .streams
            .iter()
            .filter(|(_, chain)| chain.strong_count() > 0)
            .count()
    }

    /// Number of streams holding an unreleased update in the current round.
    pub fn pending_count(&self) -> usize {
        let guard = self.shared.state.lock();
        let count = guard.borrow().pending.len();
        count
    }
}

impl Default for SynchronizerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMiddleware for SynchronizerMiddleware {
    fn wrap_stream(&self, stream: Arc<dyn PropertyStream>) -> Arc<dyn PropertyStream> {
        let key = StreamKey(self.shared.next_key.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::clone(&self.shared);
        let chain = StreamChain::new(stream, move |update| {
            shared.accumulate(key, update);
            None
        });

        let guard = self.shared.state.lock();
        let mut state = guard.borrow_mut();
        state.streams.push((key, Arc::downgrade(&chain)));
        debug!("Synchronizer now wraps {} stream(s)", state.streams.len());
        drop(state);
        drop(guard);

        chain
    }
}

impl std::fmt::Debug for SynchronizerMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizerMiddleware")
            .field("streams", &self.stream_count())
            .field("pending", &self.pending_count())
            .field("config", &self.shared.config)
            .finish()
    }
}
