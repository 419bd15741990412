//! In-memory job store backend
//!
//! Records live in a map of per-job mutexes behind a read-write lock. The
//! outer lock is held only long enough to find or insert an entry, so
//! updates to different jobs proceed in parallel while updates to the same
//! job serialize on its own mutex.

use crate::job::{Job, JobId, JobStatus};
use crate::store::{check_update, JobStore, StoreError, StoreResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// In-memory job store
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: JobId) -> StoreResult<Arc<Mutex<Job>>> {
        let jobs = self.jobs.read().expect("job map lock poisoned");
        jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }
}

impl JobStore for MemoryStore {
    fn create(&self, job: Job) -> StoreResult<JobId> {
        let id = job.id;
        let mut jobs = self.jobs.write().expect("job map lock poisoned");
        if jobs.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        jobs.insert(id, Arc::new(Mutex::new(job)));
        Ok(id)
    }

    fn get(&self, id: JobId) -> StoreResult<Job> {
        let entry = self.entry(id)?;
        let job = entry.lock().expect("job lock poisoned");
        Ok(job.clone())
    }

    fn update(
        &self,
        id: JobId,
        mutate: &mut dyn FnMut(&mut Job) -> StoreResult<()>,
    ) -> StoreResult<Job> {
        let entry = self.entry(id)?;
        let mut slot = entry.lock().expect("job lock poisoned");

        let mut working = slot.clone();
        mutate(&mut working)?;
        check_update(&slot, &working)?;
        working.updated_at = Utc::now();

        *slot = working.clone();
        Ok(working)
    }

    fn list(&self, status: Option<JobStatus>) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().expect("job map lock poisoned");
        let mut out = Vec::new();
        for entry in jobs.values() {
            let job = entry.lock().expect("job lock poisoned");
            if status.map_or(true, |s| job.status == s) {
                out.push(job.clone());
            }
        }
        // Stable order for callers that display listings
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}
