//! Job store module
//!
//! The store owns the authoritative job records. It offers atomic,
//! validated mutations with per-job mutual exclusion: two workers can never
//! both commit an update to the same job at the same time, and no committed
//! update may violate the lifecycle state machine.
//!
//! Two backends are provided: an in-memory store for tests and ephemeral
//! deployments, and a file-backed store that keeps one JSON document per
//! job and survives process restarts.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::job::{validate_update, Job, JobId, JobStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Invalid transition for job {id} ({from} -> {to}): {reason}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Aggregate job counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub counts: HashMap<JobStatus, usize>,
    pub total: usize,
}

/// Trait for job store backends
///
/// Implementations must serialize updates per job id (not globally) and
/// reject any mutation that `job::validate_update` refuses. Reads return a
/// consistent snapshot of a single record.
pub trait JobStore: Send + Sync + 'static {
    /// Inserts a new job record. Fails if the id is already present.
    fn create(&self, job: Job) -> StoreResult<JobId>;

    /// Returns a snapshot of the job, or `NotFound`.
    fn get(&self, id: JobId) -> StoreResult<Job>;

    /// Applies `mutate` to the job record atomically.
    ///
    /// The mutator runs on a working copy under the per-id lock; it may
    /// bail out with an error of its own (nothing is committed in that
    /// case). After the mutator returns, the update is validated against
    /// the previous snapshot and committed only if legal. Returns the
    /// committed record.
    fn update(
        &self,
        id: JobId,
        mutate: &mut dyn FnMut(&mut Job) -> StoreResult<()>,
    ) -> StoreResult<Job>;

    /// Lists job snapshots, optionally filtered by status.
    fn list(&self, status: Option<JobStatus>) -> StoreResult<Vec<Job>>;

    /// Lists jobs currently in the running state (reaper support).
    fn list_running(&self) -> StoreResult<Vec<Job>> {
        self.list(Some(JobStatus::Running))
    }

    /// Returns aggregate counts by status.
    fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats::default();
        for job in self.list(None)? {
            *stats.counts.entry(job.status).or_insert(0) += 1;
            stats.total += 1;
        }
        Ok(stats)
    }
}

/// Validates `new` against `old` and maps violations to `StoreError`.
///
/// Shared by both backends so the rules cannot drift between them.
pub(crate) fn check_update(old: &Job, new: &Job) -> StoreResult<()> {
    validate_update(old, new).map_err(|reason| StoreError::InvalidTransition {
        id: old.id,
        from: old.status,
        to: new.status,
        reason,
    })
}
