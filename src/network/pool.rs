//! Worker Pool
//!
//! Fixed set of worker threads fed by a bounded queue.
//!
//! ## Backpressure
//! `size` workers each serve one item at a time; up to `queue_depth` more
//! items wait in the queue. Admission counts items, not channel slots: an
//! item is accepted while fewer than `size + queue_depth` are outstanding
//! (running or queued). Beyond that `try_submit` hands the item back
//! instead of blocking or spawning, so the caller decides how to reject it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::error::{KvError, Result};

type Handler<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Bounded pool of worker threads
pub struct WorkerPool<T: Send + 'static> {
    workers: HashMap<usize, JoinHandle<()>>,
    sender: Option<Sender<T>>,
    finished: Receiver<usize>,
    busy: Arc<AtomicUsize>,

    /// Items accepted and not yet finished
    outstanding: Arc<AtomicUsize>,
    size: usize,
    capacity: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `size` workers that run `handler` on each submitted item
    pub fn new<F>(size: usize, queue_depth: usize, handler: F) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(KvError::Config("worker pool needs at least one worker".into()));
        }

        let capacity = size + queue_depth;
        let (sender, receiver) = channel::bounded::<T>(capacity);
        let (done, finished) = channel::unbounded();
        let busy = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let handler: Handler<T> = Arc::new(handler);

        let mut workers = HashMap::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let done = done.clone();
            let counters = WorkerCounters {
                busy: Arc::clone(&busy),
                outstanding: Arc::clone(&outstanding),
            };
            let handler = Arc::clone(&handler);

            let thread = thread::Builder::new()
                .name(format!("kv-worker-{}", id))
                .spawn(move || worker_loop(id, receiver, handler, counters, done))?;
            workers.insert(id, thread);
        }

        Ok(Self {
            workers,
            sender: Some(sender),
            finished,
            busy,
            outstanding,
            size,
            capacity,
        })
    }

    /// Queue an item without blocking
    ///
    /// Hands the item back when every worker is busy and the queue is full,
    /// or when the pool is shutting down.
    pub fn try_submit(&self, item: T) -> std::result::Result<(), T> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(item);
        };

        let capacity = self.capacity;
        let admitted = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            return Err(item);
        }

        match sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                Err(item)
            }
        }
    }

    /// Workers currently running an item
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Items waiting for a worker
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers plus queue slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop taking work and wait up to `grace` for workers to finish
    ///
    /// Items already queued are still handed to workers. Returns the number
    /// of workers that were still running when the grace period ended;
    /// those threads are detached.
    pub fn shutdown(mut self, grace: Duration) -> usize {
        drop(self.sender.take());

        let deadline = Instant::now() + grace;
        while !self.workers.is_empty() {
            match self.finished.recv_deadline(deadline) {
                Ok(id) => {
                    if let Some(thread) = self.workers.remove(&id) {
                        let _ = thread.join();
                    }
                    tracing::debug!("worker {} stopped", id);
                }
                Err(_) => break,
            }
        }

        let stragglers = self.workers.len();
        if stragglers > 0 {
            tracing::warn!("{} worker(s) still busy after {:?} grace period", stragglers, grace);
        }
        self.workers.clear();
        stragglers
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        // Workers exit on their own once the queue is closed and drained.
        drop(self.sender.take());
    }
}

struct WorkerCounters {
    busy: Arc<AtomicUsize>,
    outstanding: Arc<AtomicUsize>,
}

fn worker_loop<T>(
    id: usize,
    receiver: Receiver<T>,
    handler: Handler<T>,
    counters: WorkerCounters,
    done: Sender<usize>,
) {
    for item in receiver.iter() {
        counters.busy.fetch_add(1, Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(item)));
        counters.busy.fetch_sub(1, Ordering::SeqCst);
        counters.outstanding.fetch_sub(1, Ordering::SeqCst);

        if outcome.is_err() {
            tracing::error!("worker {} recovered from a panicking job", id);
        }
    }

    let _ = done.send(id);
}
