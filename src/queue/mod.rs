//! Queue module
//!
//! The queue is an ordered channel of pending job ids. It holds references
//! only; the store owns the records. Dequeue removes the head so an id is
//! delivered to at most one caller per enqueue, and `enqueue_after` gives
//! retries scheduled visibility instead of a blocking sleep inside a
//! worker.

mod memory;

pub use memory::MemoryQueue;

use crate::job::JobId;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Trait for queue backends
pub trait Queue: Send + Sync + 'static {
    /// Appends a job id to the tail of the queue
    fn enqueue(&self, id: JobId) -> impl Future<Output = QueueResult<()>> + Send;

    /// Makes a job id visible for dequeue only after `delay` has elapsed
    fn enqueue_after(
        &self,
        id: JobId,
        delay: Duration,
    ) -> impl Future<Output = QueueResult<()>> + Send;

    /// Removes and returns the head of the queue, blocking up to `timeout`
    /// if the queue is empty. A zero timeout returns immediately with
    /// `None` when nothing is ready.
    fn dequeue(&self, timeout: Duration) -> impl Future<Output = QueueResult<Option<JobId>>> + Send;

    /// Returns true if the id is currently queued (ready or delayed)
    fn contains(&self, id: JobId) -> impl Future<Output = QueueResult<bool>> + Send;

    /// Number of ids currently queued (ready and delayed)
    fn len(&self) -> impl Future<Output = QueueResult<usize>> + Send;
}
