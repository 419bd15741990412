//! File-backed job store backend
//!
//! Each job is persisted as one JSON document at `<dir>/<id>.json`. Updates
//! write a temporary sibling file and rename it over the record, so a crash
//! mid-write never leaves a partially written document behind. Per-job
//! mutual exclusion uses the same lock-per-id scheme as the in-memory
//! backend, on top of the on-disk records.

use crate::job::{Job, JobId, JobStatus};
use crate::store::{check_update, JobStore, StoreError, StoreResult};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File-backed job store
pub struct FileStore {
    dir: PathBuf,
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock_for(&self, id: JobId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        // Entries held only by the map belong to ids nobody is touching;
        // dropping them keeps the map bounded by the number of in-flight
        // operations rather than the number of jobs ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id).or_default())
    }

    fn read_record(&self, path: &Path, id: JobId) -> StoreResult<Job> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Serializes the job and atomically replaces its record
    fn write_record(&self, job: &Job) -> StoreResult<()> {
        let path = self.record_path(job.id);
        let tmp = self.dir.join(format!("{}.json.tmp", job.id));
        fs::write(&tmp, serde_json::to_vec_pretty(job)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl JobStore for FileStore {
    fn create(&self, job: Job) -> StoreResult<JobId> {
        let id = job.id;
        let lock = self.lock_for(id);
        let _guard = lock.lock().expect("job lock poisoned");

        if self.record_path(id).exists() {
            return Err(StoreError::AlreadyExists(id));
        }
        self.write_record(&job)?;
        Ok(id)
    }

    fn get(&self, id: JobId) -> StoreResult<Job> {
        self.read_record(&self.record_path(id), id)
    }

    fn update(
        &self,
        id: JobId,
        mutate: &mut dyn FnMut(&mut Job) -> StoreResult<()>,
    ) -> StoreResult<Job> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().expect("job lock poisoned");

        let old = self.read_record(&self.record_path(id), id)?;
        let mut working = old.clone();
        mutate(&mut working)?;
        check_update(&old, &working)?;
        working.updated_at = Utc::now();

        self.write_record(&working)?;
        Ok(working)
    }

    fn list(&self, status: Option<JobStatus>) -> StoreResult<Vec<Job>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                // Record replaced or removed between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let job: Job = match serde_json::from_str(&content) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!("Skipping unreadable job record {}: {}", path.display(), e);
                    continue;
                }
            };
            if status.map_or(true, |s| job.status == s) {
                out.push(job);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_job() -> Job {
        Job::new("default", "https://example.com/", 3, Duration::from_secs(30))
    }

    #[test]
    fn test_create_writes_one_record_per_job() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let id = store.create(test_job()).unwrap();
        assert!(dir.path().join(format!("{}.json", id)).exists());

        let loaded = store.get(id).unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get(JobId::new()).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_update_replaces_record_atomically() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store.create(test_job()).unwrap();

        store
            .update(id, &mut |job| {
                job.status = JobStatus::Running;
                job.attempt_count += 1;
                job.started_at = Some(Utc::now());
                Ok(())
            })
            .unwrap();

        // No temp file left behind, record readable with new state
        assert!(!dir.path().join(format!("{}.json.tmp", id)).exists());
        assert_eq!(store.get(id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_update_rejects_illegal_transition() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store.create(test_job()).unwrap();

        let err = store
            .update(id, &mut |job| {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(store.get(id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = FileStore::open(dir.path()).unwrap();
            store.create(test_job()).unwrap()
        };

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(id).unwrap().id, id);
        assert_eq!(store.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.create(test_job()).unwrap();

        fs::write(dir.path().join("garbage.json"), "not json").unwrap();

        let jobs = store.list(None).unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn test_lock_map_does_not_grow_with_job_count() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        for _ in 0..10 {
            let id = store.create(test_job()).unwrap();
            store
                .update(id, &mut |job| {
                    job.status = JobStatus::Running;
                    job.attempt_count += 1;
                    job.started_at = Some(Utc::now());
                    Ok(())
                })
                .unwrap();
        }

        // Only the entry handed out by this call survives eviction
        let _lock = store.lock_for(JobId::new());
        assert_eq!(store.locks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_list_running_for_reaper() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let a = store.create(test_job()).unwrap();
        store.create(test_job()).unwrap();

        store
            .update(a, &mut |job| {
                job.status = JobStatus::Running;
                job.attempt_count += 1;
                job.started_at = Some(Utc::now());
                Ok(())
            })
            .unwrap();

        let running = store.list_running().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a);
    }
}
