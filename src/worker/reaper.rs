//! Stalled-job recovery
//!
//! A worker crash leaves its job stuck in `running`. The reaper sweeps the
//! store periodically and returns any running job untouched for longer
//! than the stall threshold to `pending`, re-enqueueing it with the
//! `recovered` flag set so the resumed attempt is not counted twice. It
//! also re-enqueues pending jobs that have been sitting unclaimed past the
//! threshold, which closes the gap where a retry was recorded but the
//! process died before the re-enqueue happened.

use crate::job::JobStatus;
use crate::queue::Queue;
use crate::store::{JobStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Recovery sweeper for stalled jobs
pub struct Reaper<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    stall_threshold: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S, Q> Reaper<S, Q>
where
    S: JobStore,
    Q: Queue,
{
    pub fn new(
        store: Arc<S>,
        queue: Arc<Q>,
        stall_threshold: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            queue,
            stall_threshold,
            interval,
            shutdown,
        }
    }

    /// Runs periodic sweeps until shutdown
    pub async fn run(mut self) {
        tracing::debug!("Reaper started, sweeping every {:?}", self.interval);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!("Reaper sweep failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!("Reaper stopped");
    }

    /// Returns true if the job record has been untouched past the threshold
    fn is_stalled(&self, updated_at: chrono::DateTime<chrono::Utc>) -> bool {
        let age = (chrono::Utc::now() - updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age >= self.stall_threshold
    }

    /// One sweep over the store; returns how many jobs were recovered
    pub async fn sweep(&self) -> crate::Result<usize> {
        let mut recovered = 0;

        for job in self.store.list_running()? {
            if !self.is_stalled(job.updated_at) {
                continue;
            }

            tracing::warn!(
                "Job {} stalled in running for over {:?}, re-enqueueing (attempt {}/{})",
                job.id,
                self.stall_threshold,
                job.attempt_count,
                job.max_attempts
            );

            let result = self.store.update(job.id, &mut |j| {
                if j.status != JobStatus::Running {
                    return Err(StoreError::InvalidTransition {
                        id: j.id,
                        from: j.status,
                        to: JobStatus::Pending,
                        reason: "job is no longer running".to_string(),
                    });
                }
                j.status = JobStatus::Pending;
                j.recovered = true;
                Ok(())
            });

            match result {
                Ok(_) => {
                    self.queue.enqueue(job.id).await?;
                    recovered += 1;
                }
                // The worker finished between listing and updating
                Err(StoreError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // Pending jobs past the threshold that are not queued were recorded
        // for retry but never made it back into the queue; putting them
        // back is safe since duplicate delivery is handled at the claim
        // boundary. A stalled pending job with a cancel request has no
        // worker left to honor it, so it is finalized here instead.
        for job in self.store.list(Some(JobStatus::Pending))? {
            if !self.is_stalled(job.updated_at) {
                continue;
            }
            if job.cancel_requested {
                tracing::info!("Job {} stalled with cancel requested, cancelling", job.id);
                let result = self.store.update(job.id, &mut |j| {
                    if j.status != JobStatus::Pending {
                        return Err(StoreError::InvalidTransition {
                            id: j.id,
                            from: j.status,
                            to: JobStatus::Cancelled,
                            reason: "job is no longer pending".to_string(),
                        });
                    }
                    j.status = JobStatus::Cancelled;
                    j.finished_at = Some(chrono::Utc::now());
                    Ok(())
                });
                match result {
                    Ok(_) | Err(StoreError::InvalidTransition { .. }) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            if !self.queue.contains(job.id).await? {
                tracing::warn!("Job {} stalled in pending, re-enqueueing", job.id);
                self.queue.enqueue(job.id).await?;
            }
        }

        Ok(recovered)
    }
}
