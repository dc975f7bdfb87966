//! Fixed-size worker pool fed by a FIFO work queue.
//!
//! The listener is the only producer; every worker is a consumer. Workers
//! block on the queue when it is empty and never exit while the pool is
//! alive. A panicking job is contained to that job.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// A job handed back by [`WorkerPool::submit`] because the queue is full.
#[derive(Debug)]
pub struct Rejected<T>(pub T);

/// Pool of long-lived worker threads.
pub struct WorkerPool<T: Send + 'static> {
    sender: Option<Sender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `workers` threads running `handler` on each queued job.
    ///
    /// With `queue_capacity` unset the queue is unbounded, so sustained
    /// overload grows memory without limit. With a capacity, jobs beyond it
    /// are rejected instead of queued.
    pub fn new<F>(workers: usize, queue_capacity: Option<usize>, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = match queue_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };

        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver, handler))?;

            handles.push(handle);
        }

        info!(workers, queue_capacity = ?queue_capacity, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    /// Queue a job without blocking.
    pub fn submit(&self, job: T) -> Result<(), Rejected<T>> {
        let Some(sender) = &self.sender else {
            return Err(Rejected(job));
        };
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Disconnected(job) => Rejected(job),
        })
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        // Workers drain the queue and exit once the sender is gone
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<T, F>(worker_id: usize, receiver: Receiver<T>, handler: Arc<F>)
where
    F: Fn(T),
{
    for job in receiver.iter() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(job))) {
            error!(
                worker = worker_id,
                panic = panic_message(payload.as_ref()),
                "Request handler panicked"
            );
        }
    }
    debug!(worker = worker_id, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
