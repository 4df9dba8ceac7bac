//! Single-consumer FIFO work queue
//!
//! Producers push through a cloneable [`WorkQueue`]; exactly one worker owns
//! the matching [`QueueReceiver`] and runs jobs one at a time in enqueue
//! order. Every job gets a [`Completion`] that resolves with its result.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::errors::VoltexError;

struct Job<T, R> {
    item: T,
    done: oneshot::Sender<R>,
}

#[derive(Default)]
struct QueueStatus {
    pending: AtomicUsize,
    running: AtomicBool,
}

/// Producer side of a work queue
pub struct WorkQueue<T, R> {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job<T, R>>,
    status: Arc<QueueStatus>,
}

impl<T, R> Clone for WorkQueue<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            status: Arc::clone(&self.status),
        }
    }
}

/// Consumer side of a work queue, owned by its worker
pub struct QueueReceiver<T, R> {
    name: &'static str,
    rx: mpsc::UnboundedReceiver<Job<T, R>>,
    status: Arc<QueueStatus>,
}

/// Resolves once the enqueued job has finished
pub struct Completion<R> {
    rx: oneshot::Receiver<R>,
}

impl<R> Completion<R> {
    /// Wait for the job's result. Fails if the job panicked or the worker
    /// stopped before reaching it.
    pub async fn wait(self) -> Result<R, VoltexError> {
        self.rx
            .await
            .map_err(|_| VoltexError::QueueError("job was dropped before completing".to_string()))
    }
}

/// A connected producer/consumer pair
pub fn work_queue<T, R>(name: &'static str) -> (WorkQueue<T, R>, QueueReceiver<T, R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let status = Arc::new(QueueStatus::default());
    (
        WorkQueue {
            name,
            tx,
            status: Arc::clone(&status),
        },
        QueueReceiver { name, rx, status },
    )
}

impl<T, R> WorkQueue<T, R> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append `item` to the queue
    pub fn enqueue(&self, item: T) -> Result<Completion<R>, VoltexError> {
        let (done, rx) = oneshot::channel();
        self.status.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Job { item, done }).is_err() {
            self.status.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(VoltexError::QueueError(format!("{} queue is closed", self.name)));
        }
        debug!("Enqueued job on {} queue ({} pending)", self.name, self.pending());
        Ok(Completion { rx })
    }

    /// Jobs waiting to start
    pub fn pending(&self) -> usize {
        self.status.pending.load(Ordering::SeqCst)
    }

    /// Whether a job is executing right now
    pub fn is_running(&self) -> bool {
        self.status.running.load(Ordering::SeqCst)
    }
}

impl<T, R> QueueReceiver<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Run jobs until shutdown or until every producer is gone.
    ///
    /// Each job runs on its own task and is awaited before the next one is
    /// taken, so a panicking job is contained and the queue keeps going.
    /// Shutdown is only observed between jobs.
    pub async fn drain<H, F>(
        mut self,
        handler: H,
        mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) where
        H: Fn(T) -> F,
        F: Future<Output = R> + Send + 'static,
    {
        loop {
            let job = tokio::select! {
                biased;
                _ = &mut shutdown_signal => {
                    info!("{} queue shutting down ({} pending)", self.name, self.status.pending.load(Ordering::SeqCst));
                    return;
                }
                job = self.rx.recv() => job,
            };
            let Some(job) = job else {
                info!("{} queue closed", self.name);
                return;
            };

            self.status.pending.fetch_sub(1, Ordering::SeqCst);
            self.status.running.store(true, Ordering::SeqCst);

            match tokio::spawn(handler(job.item)).await {
                Ok(result) => {
                    // The producer may have dropped its completion
                    let _ = job.done.send(result);
                }
                Err(e) => error!("{} job aborted: {}", self.name, e),
            }

            self.status.running.store(false, Ordering::SeqCst);
        }
    }
}
