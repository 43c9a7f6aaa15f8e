//! Upload executor - bounded-concurrency task runner
//!
//! Never queues: when every slot is taken the submission is refused and the
//! caller fails that sub-batch.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

/// A claimed upload slot, released on drop
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Fixed pool of upload slots
#[derive(Debug)]
pub struct UploadExecutor {
    slots: Arc<Semaphore>,
    capacity: usize,
    tasks: JoinSet<()>,
}

impl UploadExecutor {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            tasks: JoinSet::new(),
        }
    }

    /// Run `task` if a slot is free
    ///
    /// Returns `false` immediately when saturated. The slot is held until the
    /// task completes.
    pub fn submit<F>(&mut self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.try_reserve() {
            Some(slot) => {
                self.spawn(slot, task);
                true
            }
            None => false,
        }
    }

    /// Claim a slot without blocking
    ///
    /// Lets the caller keep ownership of its work when the pool is full.
    pub fn try_reserve(&mut self) -> Option<Slot> {
        self.reap();
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    /// Run `task` on a reserved slot
    pub fn spawn<F>(&mut self, slot: Slot, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let _slot = slot;
            task.await;
        });
        observability::metrics::record_uploads_in_flight(self.in_flight());
    }

    /// Uploads currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Collect finished tasks without waiting
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Upload task failed");
            }
        }
    }

    /// Wait for every outstanding upload
    #[instrument(name = "upload_executor_join_all", skip(self), fields(outstanding = self.tasks.len()))]
    pub async fn join_all(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Upload task failed");
            }
        }
        debug!("All uploads finished");
    }
}
