//! In-memory queue backend
//!
//! A FIFO ready lane plus a min-heap of delayed entries keyed by the
//! instant they become visible. Dequeuers drain due delayed entries into
//! the ready lane before popping, and sleep until whichever comes first:
//! their own timeout, the next delayed entry, or a wakeup from an enqueue.

use crate::job::JobId;
use crate::queue::{Queue, QueueResult};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// An id waiting out its visibility delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DelayedEntry {
    ready_at: Instant,
    /// Enqueue sequence number, so entries with equal ready times keep
    /// their arrival order
    seq: u64,
    id: JobId,
}

// Reversed ordering: the BinaryHeap is a max-heap and we want the earliest
// ready time on top.
impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<JobId>,
    delayed: BinaryHeap<DelayedEntry>,
    next_seq: u64,
}

impl Inner {
    /// Moves every due delayed entry into the ready lane
    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .map_or(false, |entry| entry.ready_at <= now)
        {
            let entry = self.delayed.pop().expect("peeked entry vanished");
            self.ready.push_back(entry.id);
        }
    }
}

/// In-memory FIFO queue with delayed visibility support
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }
}

impl Queue for MemoryQueue {
    async fn enqueue(&self, id: JobId) -> QueueResult<()> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.ready.push_back(id);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn enqueue_after(&self, id: JobId, delay: Duration) -> QueueResult<()> {
        if delay.is_zero() {
            return self.enqueue(id).await;
        }
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.delayed.push(DelayedEntry {
                ready_at: Instant::now() + delay,
                seq,
                id,
            });
        }
        // Wake a waiter so it recomputes its sleep deadline
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<JobId>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking, so an enqueue between the
            // check and the wait is not lost.
            let notified = self.notify.notified();

            let next_ready_at = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                inner.promote_due(Instant::now());
                if let Some(id) = inner.ready.pop_front() {
                    return Ok(Some(id));
                }
                inner.delayed.peek().map(|entry| entry.ready_at)
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wake_at = next_ready_at.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)) => {}
            }
        }
    }

    async fn contains(&self, id: JobId) -> QueueResult<bool> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        Ok(inner.ready.contains(&id) || inner.delayed.iter().any(|entry| entry.id == id))
    }

    async fn len(&self) -> QueueResult<usize> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        Ok(inner.ready.len() + inner.delayed.len())
    }
}
