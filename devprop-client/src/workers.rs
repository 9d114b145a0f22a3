//! Background threads used by the callback client
//!
//! - [`WorkerPool`]: a fixed set of threads running callbacks from a shared queue
//! - [`CompletionDispatcher`]: a thread with its own tokio runtime that waits on
//!   pending get/set results without blocking the caller

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{ClientError, Result};

/// A unit of callback work
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of threads running callbacks in submission order.
///
/// With a single worker, callbacks never run concurrently. Dropping the pool
/// lets queued jobs finish and joins the workers.
pub(crate) struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize, capacity: Option<usize>) -> Result<Self> {
        let (tx, rx) = match capacity {
            Some(capacity) => channel::bounded::<Job>(capacity),
            None => channel::unbounded::<Job>(),
        };

        let handles = (0..workers)
            .map(|index| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("devprop-callback-{}", index))
                    .spawn(move || {
                        for job in rx.iter() {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                tracing::error!("Callback panicked, worker continues");
                            }
                        }
                        tracing::debug!("Callback worker {} exiting", index);
                    })
                    .map_err(|e| {
                        ClientError::WorkerPool(format!("failed to spawn callback worker: {}", e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Started {} callback worker(s)", handles.len());
        Ok(Self {
            tx: Some(tx),
            workers: handles,
        })
    }

    /// Queue `job` without blocking.
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ClientError::WorkerDisconnected)?;
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => ClientError::WorkerPool("callback queue is full".to_string()),
            TrySendError::Disconnected(_) => ClientError::WorkerDisconnected,
        })
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A callback that owned the last client handle drops the pool from
            // a worker thread, which can not join itself.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("Callback worker terminated abnormally");
            }
        }
    }
}

/// Dedicated thread driving completion futures on a current-thread runtime.
///
/// Dropping the dispatcher shuts the runtime down; completions still waiting
/// at that point are cancelled.
pub(crate) struct CompletionDispatcher {
    tx: Option<mpsc::UnboundedSender<BoxFuture<'static, ()>>>,
    in_flight: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl CompletionDispatcher {
    pub(crate) fn spawn() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&in_flight);

        let handle = thread::Builder::new()
            .name("devprop-completions".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!("Failed to create tokio runtime for completions: {}", e);
                        return;
                    }
                };

                rt.block_on(async {
                    while let Some(completion) = rx.recv().await {
                        let counter = Arc::clone(&counter);
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            completion.await;
                            counter.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });

                let cancelled = counter.load(Ordering::SeqCst);
                if cancelled > 0 {
                    tracing::debug!(
                        "Completion dispatcher exiting, cancelling {} in-flight completion(s)",
                        cancelled
                    );
                } else {
                    tracing::debug!("Completion dispatcher exiting");
                }
                drop(rt);
            })
            .map_err(|e| {
                ClientError::WorkerPool(format!("failed to spawn completion dispatcher: {}", e))
            })?;

        Ok(Self {
            tx: Some(tx),
            in_flight,
            handle: Some(handle),
        })
    }

    /// Completions submitted but not yet finished.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn submit(&self, completion: BoxFuture<'static, ()>) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or(ClientError::WorkerDisconnected)?
            .send(completion)
            .map_err(|_| ClientError::WorkerDisconnected)
    }
}

impl Drop for CompletionDispatcher {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("Completion dispatcher terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order_on_single_worker() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pool = WorkerPool::new(1, None).unwrap();
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            pool.submit(Box::new(move || seen.lock().push(i))).unwrap();
        }
        drop(pool);
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1, None).unwrap();
        pool.submit(Box::new(|| panic!("callback failure"))).unwrap();
        let counter = Arc::clone(&count);
        pool.submit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        drop(pool);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bounded_queue_rejects_when_full() {
        let pool = WorkerPool::new(1, Some(1)).unwrap();
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam::channel::bounded::<()>(1);
        pool.submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv().unwrap();

        pool.submit(Box::new(|| {})).unwrap();
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(ClientError::WorkerPool(_))
        ));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_dispatcher_runs_futures() {
        let dispatcher = CompletionDispatcher::spawn().unwrap();
        let (tx, rx) = crossbeam::channel::bounded(1);
        dispatcher
            .submit(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = tx.send(5);
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(5));
    }

    struct SignalOnDrop(crossbeam::channel::Sender<()>);

    impl Drop for SignalOnDrop {
        fn drop(&mut self) {
            let _ = self.0.send(());
        }
    }

    #[test]
    fn test_drop_cancels_in_flight_completions() {
        let dispatcher = CompletionDispatcher::spawn().unwrap();
        let (never_tx, never_rx) = futures::channel::oneshot::channel::<()>();
        let (dropped_tx, dropped_rx) = crossbeam::channel::bounded(1);
        let (ran_tx, ran_rx) = crossbeam::channel::bounded::<()>(1);

        let guard = SignalOnDrop(dropped_tx);
        dispatcher
            .submit(Box::pin(async move {
                let _guard = guard;
                let _ = never_rx.await;
                let _ = ran_tx.send(());
            }))
            .unwrap();

        for _ in 0..200 {
            if dispatcher.in_flight() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(dispatcher.in_flight(), 1);

        drop(dispatcher);
        assert!(dropped_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(ran_rx.try_recv().is_err());
        drop(never_tx);
    }
}
