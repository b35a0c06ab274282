//! Background reclamation of chunk objects after a successful merge.
//!
//! Jobs go onto a bounded queue drained by a fixed set of worker tasks.
//! Submitting never blocks the request that merged; if the queue is full the
//! job is dropped and its chunks stay behind as orphans.

use crate::{
    models::upload::chunk_key,
    services::object_store::{ObjectStore, StorageError},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Delete chunks `0..chunk_count` of `hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    pub hash: String,
    pub chunk_count: u32,
}

#[derive(Clone)]
pub struct CleanupPool {
    tx: mpsc::Sender<CleanupJob>,
    workers: Arc<Vec<JoinHandle<()>>>,
}

impl CleanupPool {
    /// Spawn `workers` tasks sharing a queue of `queue_depth` pending jobs.
    /// Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn ObjectStore>, workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let store = store.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        // Lock only while waiting so other workers can run jobs.
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(job) => run_job(store.as_ref(), &job).await,
                            None => break,
                        }
                    }
                    debug!(worker, "cleanup worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            workers: Arc::new(handles),
        }
    }

    /// Enqueue `job`. Returns `false` when it was dropped.
    pub fn submit(&self, job: CleanupJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    hash = %job.hash,
                    chunk_count = job.chunk_count,
                    "cleanup queue full, leaving chunks in place"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(hash = %job.hash, "cleanup pool stopped, leaving chunks in place");
                false
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// One delete attempt per chunk; failures are logged and not retried.
async fn run_job(store: &dyn ObjectStore, job: &CleanupJob) {
    let mut deleted = 0u32;
    let mut failed = 0u32;
    for index in 0..job.chunk_count {
        let key = chunk_key(&job.hash, index);
        match store.delete(&key).await {
            Ok(()) => deleted += 1,
            Err(StorageError::NotFound(_)) => debug!(%key, "chunk already gone"),
            Err(err) => {
                failed += 1;
                warn!(%key, error = %err, "failed to delete chunk");
            }
        }
    }
    info!(hash = %job.hash, deleted, failed, "chunk cleanup finished");
}
