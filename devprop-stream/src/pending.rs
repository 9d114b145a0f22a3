//! One-shot eventual results handed out by providers.
//!
//! A provider creates a [`Completer`]/[`Pending`] pair, returns the `Pending`
//! to the client and resolves the `Completer` from whichever thread finishes
//! the work. The `Pending` can be awaited, or waited on from synchronous code.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{Result, StreamError};

/// Create a linked completer and pending result.
pub fn pending<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { tx },
        Pending {
            inner: PendingInner::Waiting(rx),
        },
    )
}

/// Resolving side of a [`Pending`] result.
///
/// Dropping a completer without calling [`Completer::complete`] resolves the
/// pending side with [`StreamError::Abandoned`].
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Completer<T> {
    /// Resolve the pending result.
    ///
    /// Returns `false` if the pending side has already been dropped.
    pub fn complete(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    /// Check whether anyone is still waiting on the result.
    pub fn is_canceled(&self) -> bool {
        self.tx.is_canceled()
    }
}

/// A result that becomes available at some later point.
#[derive(Debug)]
pub struct Pending<T> {
    inner: PendingInner<T>,
}

#[derive(Debug)]
enum PendingInner<T> {
    Ready(Option<T>),
    Waiting(oneshot::Receiver<T>),
}

// The value is only ever moved out, never pinned in place.
impl<T> Unpin for Pending<T> {}

impl<T> Pending<T> {
    /// A pending result which is already resolved.
    pub fn ready(value: T) -> Self {
        Self {
            inner: PendingInner::Ready(Some(value)),
        }
    }

    /// Block the calling thread until the result is available.
    ///
    /// Must not be called from within an async task.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            PendingInner::Ready(value) => Poll::Ready(value.take().ok_or(StreamError::Abandoned)),
            PendingInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.map_err(|_| StreamError::Abandoned)),
        }
    }
}
