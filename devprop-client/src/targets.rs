//! Delivery targets: where a subscription pushes the updates it receives.
//!
//! Every subscription owns a [`DeliveryTargets`] set, which is the handler it
//! registers on its stream. Enabling a subscription or a pool adds a target to
//! that set for the lifetime of a scope guard; updates arriving while the set
//! is empty are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use devprop_stream::{StreamHandler, StreamUpdate};

/// Unique identifier for a target added to a [`DeliveryTargets`] set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "target-{}", self.0)
    }
}

/// Something a subscription can push updates into.
///
/// `deliver` must not block. It returns `false` when the target can never
/// accept updates again.
pub trait DeliveryTarget: Clone + Send + Sync + 'static {
    fn deliver(&self, update: &StreamUpdate) -> bool;
}

// Blocking queues are unbounded, so sending never waits.
impl DeliveryTarget for crossbeam::channel::Sender<StreamUpdate> {
    fn deliver(&self, update: &StreamUpdate) -> bool {
        self.send(Arc::clone(update)).is_ok()
    }
}

impl DeliveryTarget for tokio::sync::mpsc::UnboundedSender<StreamUpdate> {
    fn deliver(&self, update: &StreamUpdate) -> bool {
        self.send(Arc::clone(update)).is_ok()
    }
}

/// The set of targets a subscription currently delivers to.
pub struct DeliveryTargets<T> {
    targets: Mutex<Vec<(TargetId, T)>>,
}

impl<T: DeliveryTarget> DeliveryTargets<T> {
    pub(crate) fn new() -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, target: T) -> TargetId {
        let id = TargetId::next();
        self.targets.lock().push((id, target));
        id
    }

    pub(crate) fn remove(&self, id: TargetId) -> Option<T> {
        let mut targets = self.targets.lock();
        let position = targets.iter().position(|(existing, _)| *existing == id)?;
        Some(targets.remove(position).1)
    }

    /// Number of targets currently enabled.
    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: DeliveryTarget> StreamHandler for DeliveryTargets<T> {
    fn response_received(&self, update: &StreamUpdate) {
        if self.is_empty() {
            tracing::trace!("No target enabled, dropping update for {}", update.query());
            return;
        }
        // Deliver outside the lock so targets may be added or removed from
        // inside a delivery.
        let snapshot: Vec<(TargetId, T)> = self.targets.lock().clone();
        for (id, target) in snapshot {
            if !target.deliver(update) {
                tracing::debug!("Delivery {} has closed, skipping", id);
            }
        }
    }
}

impl<T: DeliveryTarget> std::fmt::Debug for DeliveryTargets<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTargets")
            .field("enabled", &self.len())
            .finish()
    }
}

// ============================================================================
// Pool membership
// ============================================================================

/// The target sets of every subscription a client has created.
///
/// Held weakly: a dropped subscription leaves the pool.
pub(crate) struct Members<T> {
    members: Mutex<Vec<Weak<DeliveryTargets<T>>>>,
}

impl<T: DeliveryTarget> Members<T> {
    pub(crate) fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, targets: &Arc<DeliveryTargets<T>>) {
        let mut members = self.members.lock();
        members.retain(|member| member.strong_count() > 0);
        members.push(Arc::downgrade(targets));
    }

    /// Live members in creation order.
    pub(crate) fn live(&self) -> Vec<Arc<DeliveryTargets<T>>> {
        let mut members = self.members.lock();
        members.retain(|member| member.strong_count() > 0);
        members.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|member| member.strong_count() > 0)
            .count()
    }
}

// ============================================================================
// Scope guard
// ============================================================================

/// Targets added for the lifetime of a scope, removed again on drop.
pub(crate) struct Enabled<T: DeliveryTarget> {
    entries: Vec<(Weak<DeliveryTargets<T>>, TargetId)>,
}

impl<T: DeliveryTarget> Enabled<T> {
    /// Add `target` to every set in `sets`.
    pub(crate) fn add_to<'a, I>(sets: I, target: &T) -> Self
    where
        I: IntoIterator<Item = &'a Arc<DeliveryTargets<T>>>,
    {
        let entries = sets
            .into_iter()
            .map(|set| (Arc::downgrade(set), set.add(target.clone())))
            .collect();
        Self { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T: DeliveryTarget> Drop for Enabled<T> {
    fn drop(&mut self) {
        for (set, id) in self.entries.drain(..) {
            if let Some(set) = set.upgrade() {
                set.remove(id);
            }
        }
    }
}
