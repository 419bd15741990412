//! Dispatcher module
//!
//! The dispatcher is the caller-facing surface of the engine: it validates
//! submissions, creates job records, hands ids to the queue, and answers
//! status, result, and cancellation requests. It never executes attempts
//! itself; that is the worker pool's job.

use crate::config::Config;
use crate::job::{Job, JobError, JobId, JobStatus};
use crate::queue::Queue;
use crate::spider::SpiderRegistry;
use crate::store::{JobStore, StoreError, StoreStats};
use crate::{MillError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Optional per-submission overrides
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Target URL; falls back to the spider's start URL when absent
    pub url: Option<String>,

    /// Attempt ceiling override
    pub max_attempts: Option<u32>,

    /// Fetch timeout override
    pub timeout: Option<Duration>,
}

/// Point-in-time view of a job's progress
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub id: JobId,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub error: Option<JobError>,
}

/// Outcome of a result query
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job completed; the parsed data is attached
    Ready(serde_json::Value),

    /// The job is still pending or running
    NotReady,

    /// The job failed; the recorded error is attached
    Failed(JobError),

    /// The job was cancelled before completing
    Cancelled,
}

/// Caller-facing submission and inspection surface
pub struct Dispatcher<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    registry: Arc<SpiderRegistry>,
    default_max_attempts: u32,
    default_timeout: Duration,
}

impl<S, Q> Dispatcher<S, Q>
where
    S: JobStore,
    Q: Queue,
{
    pub fn new(
        store: Arc<S>,
        queue: Arc<Q>,
        registry: Arc<SpiderRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            default_max_attempts: config.retry.max_attempts,
            default_timeout: config.fetch.timeout(),
        }
    }

    /// Submits a new job and returns its id.
    ///
    /// The spider name is not required to be registered at submission time;
    /// a job naming an unknown spider fails permanently on its first
    /// attempt. The URL comes from the options, or from the spider's start
    /// URL when the spider is registered and declares one.
    pub async fn submit(&self, spider_name: &str, options: SubmitOptions) -> Result<JobId> {
        if spider_name.trim().is_empty() {
            return Err(MillError::InvalidSubmission(
                "spider name must not be empty".to_string(),
            ));
        }

        let url = match options.url {
            Some(url) => url,
            None => self
                .registry
                .resolve(spider_name)
                .and_then(|spider| spider.fetch_spec().start_url)
                .ok_or_else(|| {
                    MillError::InvalidSubmission(format!(
                        "no URL given and spider '{}' has no start URL",
                        spider_name
                    ))
                })?,
        };
        Url::parse(&url)?;

        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(MillError::InvalidSubmission(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        if timeout.is_zero() {
            return Err(MillError::InvalidSubmission(
                "timeout must be positive".to_string(),
            ));
        }

        let job = Job::new(spider_name, url, max_attempts, timeout);
        let id = self.store.create(job)?;
        self.queue.enqueue(id).await?;

        tracing::info!("Submitted job {} (spider: {})", id, spider_name);
        Ok(id)
    }

    /// Returns the current progress of a job
    pub fn status(&self, id: JobId) -> Result<StatusReport> {
        let job = self.store.get(id)?;
        Ok(StatusReport {
            id: job.id,
            status: job.status,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            error: job.error,
        })
    }

    /// Returns the job's outcome, or `NotReady` while it is still active
    pub fn result(&self, id: JobId) -> Result<JobOutcome> {
        let job = self.store.get(id)?;
        let outcome = match job.status {
            JobStatus::Completed => {
                // A completed job always carries a result; fall back to null
                // rather than panicking on a corrupt record.
                JobOutcome::Ready(job.result.unwrap_or(serde_json::Value::Null))
            }
            JobStatus::Failed => JobOutcome::Failed(job.error.unwrap_or_else(|| {
                JobError::permanent("job failed with no recorded error")
            })),
            JobStatus::Cancelled => JobOutcome::Cancelled,
            JobStatus::Pending | JobStatus::Running => JobOutcome::NotReady,
        };
        Ok(outcome)
    }

    /// Requests cancellation of a job.
    ///
    /// A pending job is cancelled immediately. A running job has its cancel
    /// flag set and finishes cooperatively at the next attempt boundary.
    /// Cancelling a terminal job is an error.
    pub fn cancel(&self, id: JobId) -> Result<Job> {
        let job = self.store.update(id, &mut |j| match j.status {
            JobStatus::Pending => {
                j.status = JobStatus::Cancelled;
                j.cancel_requested = true;
                j.finished_at = Some(Utc::now());
                Ok(())
            }
            JobStatus::Running => {
                j.cancel_requested = true;
                Ok(())
            }
            status => Err(StoreError::InvalidTransition {
                id: j.id,
                from: status,
                to: JobStatus::Cancelled,
                reason: "job already reached a terminal state".to_string(),
            }),
        })?;

        tracing::info!("Cancel requested for job {} ({})", id, job.status);
        Ok(job)
    }

    /// Lists job snapshots, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        Ok(self.store.list(status)?)
    }

    /// Returns aggregate job counts by status
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;

    fn dispatcher() -> Dispatcher<MemoryStore, MemoryQueue> {
        Dispatcher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            Arc::new(SpiderRegistry::with_builtins()),
            &Config::default(),
        )
    }

    #[tokio::test]
    async fn test_submit_creates_pending_job_and_enqueues() {
        let d = dispatcher();
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = d.status(id).unwrap();
        assert_eq!(report.status, JobStatus::Pending);
        assert_eq!(report.attempt_count, 0);
        assert_eq!(report.max_attempts, 3);
        assert_eq!(d.queue.dequeue(Duration::ZERO).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_submit_uses_spider_start_url() {
        let d = dispatcher();
        let id = d.submit("ip", SubmitOptions::default()).await.unwrap();
        let job = d.store.get(id).unwrap();
        assert_eq!(job.url, "https://ip.me/");
    }

    #[tokio::test]
    async fn test_submit_overrides_apply() {
        let d = dispatcher();
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    max_attempts: Some(7),
                    timeout: Some(Duration::from_millis(3_500)),
                },
            )
            .await
            .unwrap();

        let job = d.store.get(id).unwrap();
        assert_eq!(job.max_attempts, 7);
        // Sub-second precision survives submission
        assert_eq!(job.timeout(), Duration::from_millis(3_500));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_name() {
        let d = dispatcher();
        let err = d.submit("  ", SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, MillError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_url() {
        let d = dispatcher();
        // "default" declares no start URL, and none is supplied
        let err = d
            .submit("default", SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_url() {
        let d = dispatcher();
        let err = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("not a url".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::UrlParse(_)));
    }

    #[tokio::test]
    async fn test_submit_accepts_unknown_spider() {
        // Unknown spiders are accepted here and fail on the first attempt
        let d = dispatcher();
        let id = d
            .submit(
                "no-such-spider",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(d.status(id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_rejects_zero_max_attempts() {
        let d = dispatcher();
        let err = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    max_attempts: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_zero_timeout() {
        let d = dispatcher();
        let err = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    timeout: Some(Duration::ZERO),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn test_result_not_ready_while_active() {
        let d = dispatcher();
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(d.result(id).unwrap(), JobOutcome::NotReady);
    }

    #[tokio::test]
    async fn test_result_unknown_job_is_not_found() {
        let d = dispatcher();
        let err = d.result(JobId::new()).unwrap_err();
        assert!(matches!(err, MillError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let d = dispatcher();
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = d.cancel(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.finished_at.is_some());
        assert_eq!(d.result(id).unwrap(), JobOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_running_job_sets_flag_only() {
        let d = dispatcher();
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        d.store
            .update(id, &mut |j| {
                j.status = JobStatus::Running;
                j.attempt_count = 1;
                j.started_at = Some(Utc::now());
                Ok(())
            })
            .unwrap();

        let job = d.cancel(id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.cancel_requested);
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_rejected() {
        let d = dispatcher();
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        d.cancel(id).unwrap();

        let err = d.cancel(id).unwrap_err();
        assert!(matches!(
            err,
            MillError::Store(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let d = dispatcher();
        for _ in 0..3 {
            d.submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let id = d
            .submit(
                "default",
                SubmitOptions {
                    url: Some("https://example.com/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        d.cancel(id).unwrap();

        let stats = d.stats().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.counts.get(&JobStatus::Pending), Some(&3));
        assert_eq!(stats.counts.get(&JobStatus::Cancelled), Some(&1));
    }
}
