//! # Storage Teardown
//!
//! Disposal of a [`QueueStorage`]. Graceful shutdown flushes a final durable
//! commit before releasing the database file; abrupt shutdown releases it
//! without flushing, leaning on the engine's commit log for the next attach.
//! Dropping the last handle without an explicit shutdown falls back to the
//! graceful path.
//!
//! Teardown takes the engine gate exclusively, so it waits for every
//! in-flight scoped access to finish and acts as a barrier: once the
//! disposed flag is set, later scoped calls are refused with
//! [`StorageError::Disposed`] instead of queueing behind the teardown.

use std::sync::atomic::Ordering;

use tracing::{error, info};

use crate::error::{Result, StorageError};

use super::storage::{QueueStorage, StorageInner};

impl QueueStorage {
    /// Shuts the storage down gracefully: waits for in-flight scoped
    /// accesses, flushes a final durable commit, and releases the database
    /// file. Safe to call more than once; later calls return `Ok`.
    ///
    /// Must not be called from inside a [`global`](Self::global) or
    /// [`send`](Self::send) closure; the call would wait on its own scope.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let engine = self.inner.engine.write().take();
        match engine {
            None => Ok(()),
            Some(engine) => match engine.detach() {
                Ok(()) => {
                    info!(name = %self.inner.name, "queue storage shut down");
                    Ok(())
                }
                Err(err) => {
                    error!(error = %err, "final flush failed during shutdown");
                    Err(StorageError::Disposal(err))
                }
            },
        }
    }

    /// Releases the database file without a final flush. Committed data is
    /// preserved; whatever the engine buffered under a relaxed durability
    /// profile may be lost. Cannot fail and never blocks on flushing.
    pub fn shutdown_rudely(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        if let Some(engine) = self.inner.engine.write().take() {
            engine.detach_rudely();
            info!(name = %self.inner.name, "queue storage released abruptly");
        }
    }

    /// Whether this storage has been shut down.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for StorageInner {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Runs only when the last handle is gone, so nothing can hold the
        // gate; try_write still keeps drop from ever blocking.
        if let Some(mut slot) = self.engine.try_write() {
            if let Some(engine) = slot.take() {
                if let Err(err) = engine.detach() {
                    error!(error = %err, "final flush failed while dropping storage");
                }
            }
        }
    }
}
