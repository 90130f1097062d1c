//! Fixed-size pool of upload workers.
//!
//! Jobs wait in a FIFO queue; each worker takes the next job only after its
//! current one completes, so at most `size` uploads run at once and a job is
//! never split across workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A unit of work for the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Number of workers used when none is configured.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub struct WorkerPool {
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one). Must be called inside a Tokio
    /// runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Job>();
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let workers = (0..size)
            .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&queue_rx))))
            .collect();

        debug!(size, "worker pool started");
        Self {
            queue_tx: Mutex::new(Some(queue_tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queues `job`. Returns `false` once the pool is shut down.
    pub fn submit(&self, job: Job) -> bool {
        let queue = self.queue_tx.lock().unwrap_or_else(PoisonError::into_inner);
        match queue.as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes the queue, lets workers drain what was already queued, and
    /// waits for them to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.queue_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            let _ = handle.await;
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in workers.drain(..) {
            handle.abort();
        }
    }
}

async fn worker_loop(worker: usize, queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        // Only the worker holding the lock waits on the queue; the others
        // line up behind it in FIFO order.
        let job = queue_rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        // Run on a child task so a panicking job does not take the worker down.
        if let Err(e) = tokio::spawn(job).await {
            error!(worker, error = %e, "upload job panicked");
        }
    }
    debug!(worker, "worker exited");
}
