//! Worker execution loop
//!
//! Each worker pulls job ids from the queue, claims the job in the store,
//! resolves the spider, runs fetch+parse, and translates the outcome into
//! a state transition. Fetch and parse failures are caught here and become
//! transitions; they never take the worker down. The dequeue timeout is
//! the only place an idle worker blocks, which is also where shutdown is
//! observed.

use crate::job::{ErrorKind, Job, JobError, JobId, JobStatus};
use crate::queue::Queue;
use crate::spider::{Spider, SpiderRegistry};
use crate::store::{JobStore, StoreError};
use crate::worker::fetcher::Fetcher;
use crate::worker::retry::RetryPolicy;
use crate::config::FetchConfig;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A single worker task
pub struct Worker<S, Q, F> {
    id: usize,
    store: Arc<S>,
    queue: Arc<Q>,
    registry: Arc<SpiderRegistry>,
    fetcher: Arc<F>,
    retry: RetryPolicy,
    fetch_config: FetchConfig,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S, Q, F> Worker<S, Q, F>
where
    S: JobStore,
    Q: Queue,
    F: Fetcher,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        store: Arc<S>,
        queue: Arc<Q>,
        registry: Arc<SpiderRegistry>,
        fetcher: Arc<F>,
        retry: RetryPolicy,
        fetch_config: FetchConfig,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            store,
            queue,
            registry,
            fetcher,
            retry,
            fetch_config,
            poll_interval,
            shutdown,
        }
    }

    /// Runs the worker loop until shutdown is signalled
    ///
    /// A job already dequeued is processed to the end of its attempt; only
    /// new dequeues stop immediately.
    pub async fn run(mut self) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let dequeued = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                result = self.queue.dequeue(self.poll_interval) => result,
            };

            let id = match dequeued {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Worker {}: dequeue failed: {}", self.id, e);
                    continue;
                }
            };

            if let Err(e) = self.process(id).await {
                tracing::error!("Worker {}: error processing job {}: {}", self.id, id, e);
            }
        }

        tracing::debug!("Worker {} stopped", self.id);
    }

    /// Processes one dequeued job id through a full attempt
    async fn process(&self, id: JobId) -> crate::Result<()> {
        let job = match self.store.get(id) {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("Worker {}: dequeued unknown job {}", self.id, id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Duplicate delivery after recovery can hand us a finished job
        if job.status.is_terminal() {
            tracing::debug!("Job {} already {}, dropping duplicate delivery", id, job.status);
            return Ok(());
        }

        if job.cancel_requested && job.status == JobStatus::Pending {
            self.cancel(id)?;
            return Ok(());
        }

        let job = match self.claim(id)? {
            Some(job) => job,
            None => return Ok(()),
        };

        let spider = match self.registry.resolve(&job.spider_name) {
            Some(spider) => spider,
            None => {
                // Permanent misconfiguration, not a transient failure
                self.fail(
                    &job,
                    JobError::permanent(format!("SpiderNotFound: {}", job.spider_name)),
                )?;
                return Ok(());
            }
        };

        tracing::info!(
            "Job {}: attempt {}/{} fetching {}",
            job.id,
            job.attempt_count,
            job.max_attempts,
            job.url
        );

        match self.execute_attempt(&job, spider).await {
            Ok(result) => self.complete(&job, result)?,
            Err(error) if error.kind == ErrorKind::Permanent => self.fail(&job, error)?,
            Err(error) if !job.attempts_remaining() => self.fail(&job, error)?,
            Err(error) => self.schedule_retry(&job, error).await?,
        }

        Ok(())
    }

    /// Transitions a cancel-requested pending job to cancelled
    fn cancel(&self, id: JobId) -> crate::Result<()> {
        let result = self.store.update(id, &mut |job| {
            if job.status != JobStatus::Pending {
                return Err(StoreError::InvalidTransition {
                    id: job.id,
                    from: job.status,
                    to: JobStatus::Cancelled,
                    reason: "job is not pending".to_string(),
                });
            }
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
            Ok(())
        });
        match result {
            Ok(_) => {
                tracing::info!("Job {} cancelled", id);
                Ok(())
            }
            Err(StoreError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claims a pending job: `pending -> running`, counting the attempt.
    ///
    /// A job recovered by the reaper resumes its interrupted attempt, so
    /// the counter is left alone and the flag cleared instead. Returns
    /// None if someone else got the job first.
    fn claim(&self, id: JobId) -> crate::Result<Option<Job>> {
        let result = self.store.update(id, &mut |job| {
            if job.status != JobStatus::Pending {
                return Err(StoreError::InvalidTransition {
                    id: job.id,
                    from: job.status,
                    to: JobStatus::Running,
                    reason: "job is not pending".to_string(),
                });
            }
            job.status = JobStatus::Running;
            if job.recovered {
                job.recovered = false;
            } else {
                job.attempt_count += 1;
            }
            if job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            }
            Ok(())
        });

        match result {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::InvalidTransition { .. }) => {
                tracing::debug!("Job {} no longer claimable, skipping", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs fetch + parse for one attempt and classifies any failure.
    ///
    /// Both halves of the attempt are bounded by the job timeout: the fetch
    /// carries it per request, and the parse runs on the blocking pool so a
    /// wedged spider cannot take the worker task with it. A parse that
    /// outlives the timeout is abandoned on the blocking pool and its
    /// result dropped.
    async fn execute_attempt(
        &self,
        job: &Job,
        spider: Arc<dyn Spider>,
    ) -> Result<serde_json::Value, JobError> {
        let method = spider.fetch_spec().method;

        let page = self
            .fetcher
            .fetch(&job.url, method, job.timeout())
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        if !page.is_success() {
            let message = format!("HTTP {}", page.status_code);
            return Err(if self.fetch_config.is_permanent_status(page.status_code) {
                JobError::permanent(message)
            } else {
                JobError::transient(message)
            });
        }

        let parse = tokio::task::spawn_blocking(move || {
            spider.parse(&page.body, &page.final_url, &page.headers)
        });
        match tokio::time::timeout(job.timeout(), parse).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(JobError::transient(format!("parse error: {}", e))),
            Ok(Err(e)) => Err(JobError::transient(format!("parse task failed: {}", e))),
            Err(_) => Err(JobError::transient(format!(
                "parse timed out after {:?}",
                job.timeout()
            ))),
        }
    }

    fn complete(&self, job: &Job, result: serde_json::Value) -> crate::Result<()> {
        self.store.update(job.id, &mut |j| {
            j.status = JobStatus::Completed;
            j.result = Some(result.clone());
            j.finished_at = Some(Utc::now());
            Ok(())
        })?;
        tracing::info!(
            "Job {} completed after {} attempt(s)",
            job.id,
            job.attempt_count
        );
        Ok(())
    }

    fn fail(&self, job: &Job, error: JobError) -> crate::Result<()> {
        self.store.update(job.id, &mut |j| {
            j.status = JobStatus::Failed;
            j.error = Some(error.clone());
            j.finished_at = Some(Utc::now());
            Ok(())
        })?;
        tracing::warn!(
            "Job {} failed after {} attempt(s): {}",
            job.id,
            job.attempt_count,
            error
        );
        Ok(())
    }

    /// Records the failure, returns the job to pending, and re-enqueues it
    /// with a backoff delay via scheduled visibility
    async fn schedule_retry(&self, job: &Job, error: JobError) -> crate::Result<()> {
        let delay = self.retry.delay(job.attempt_count);
        self.store.update(job.id, &mut |j| {
            j.status = JobStatus::Pending;
            j.error = Some(error.clone());
            Ok(())
        })?;
        tracing::info!(
            "Job {}: attempt {}/{} failed ({}), retrying in {:?}",
            job.id,
            job.attempt_count,
            job.max_attempts,
            error,
            delay
        );
        self.queue.enqueue_after(job.id, delay).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use crate::worker::fetcher::{FetchError, FetchedPage};
    use crate::spider::HttpMethod;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Fetcher that replays a scripted sequence of responses
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<FetchedPage, FetchError>>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<FetchedPage, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }

        fn ok(body: &str) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                final_url: "https://example.com/".to_string(),
                status_code: 200,
                headers: HashMap::new(),
                body: body.to_string(),
            })
        }

        fn status(code: u16) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                final_url: "https://example.com/".to_string(),
                status_code: code,
                headers: HashMap::new(),
                body: String::new(),
            })
        }

        fn network_error() -> Result<FetchedPage, FetchError> {
            Err(FetchError::Network {
                url: "https://example.com/".to_string(),
                message: "connection failed".to_string(),
            })
        }
    }

    impl Fetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            url: &str,
            _method: HttpMethod,
            _timeout: Duration,
        ) -> Result<FetchedPage, FetchError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(FetchError::Network {
                        url: url.to_string(),
                        message: "script exhausted".to_string(),
                    })
                })
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        worker: Worker<MemoryStore, MemoryQueue, ScriptedFetcher>,
        _shutdown: watch::Sender<bool>,
    }

    fn fixture(script: Vec<Result<FetchedPage, FetchError>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(
            0,
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::new(SpiderRegistry::with_builtins()),
            Arc::new(ScriptedFetcher::new(script)),
            RetryPolicy::fixed(Duration::from_millis(1)),
            FetchConfig::default(),
            Duration::from_millis(10),
            rx,
        );
        Fixture {
            store,
            queue,
            worker,
            _shutdown: tx,
        }
    }

    fn submit(store: &MemoryStore, spider: &str, max_attempts: u32) -> JobId {
        let job = Job::new(
            spider,
            "https://example.com/",
            max_attempts,
            Duration::from_secs(5),
        );
        store.create(job).unwrap()
    }

    #[tokio::test]
    async fn test_successful_attempt_completes_job() {
        let fx = fixture(vec![ScriptedFetcher::ok("<html><title>Hi</title></html>")]);
        let id = submit(&fx.store, "default", 3);

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 1);
        assert!(job.finished_at.is_some());
        assert_eq!(job.result.as_ref().unwrap()["title"], "Hi");
    }

    #[tokio::test]
    async fn test_unknown_spider_fails_permanently() {
        let fx = fixture(vec![]);
        let id = submit(&fx.store, "no-such-spider", 5);

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Permanent);
        assert!(error.message.starts_with("SpiderNotFound"));
        // Nothing was re-enqueued despite remaining attempts
        assert_eq!(fx.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let fx = fixture(vec![ScriptedFetcher::network_error()]);
        let id = submit(&fx.store, "default", 3);

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Transient);
        assert_eq!(fx.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let fx = fixture(vec![
            ScriptedFetcher::network_error(),
            ScriptedFetcher::status(500),
            ScriptedFetcher::ok("<html><title>Third time</title></html>"),
        ]);
        let id = submit(&fx.store, "default", 3);

        for _ in 0..3 {
            let next = fx.queue.dequeue(Duration::from_secs(1)).await.unwrap();
            if let Some(next) = next {
                fx.worker.process(next).await.unwrap();
            } else {
                fx.worker.process(id).await.unwrap();
            }
        }

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.result.as_ref().unwrap()["title"], "Third time");
    }

    #[tokio::test]
    async fn test_attempt_ceiling_fails_job() {
        let fx = fixture(vec![ScriptedFetcher::network_error()]);
        let id = submit(&fx.store, "default", 1);

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
        assert!(job.finished_at.is_some());
        assert_eq!(fx.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permanent_status_not_retried() {
        let fx = fixture(vec![ScriptedFetcher::status(404)]);
        let id = submit(&fx.store, "default", 3);

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Permanent);
        assert_eq!(job.error.as_ref().unwrap().message, "HTTP 404");
    }

    #[tokio::test]
    async fn test_retryable_status_retried() {
        let fx = fixture(vec![ScriptedFetcher::status(503), ScriptedFetcher::ok("<html></html>")]);
        let id = submit(&fx.store, "default", 2);

        fx.worker.process(id).await.unwrap();
        assert_eq!(fx.store.get(id).unwrap().status, JobStatus::Pending);

        let next = fx
            .queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        fx.worker.process(next).await.unwrap();
        assert_eq!(fx.store.get(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_parse_error_is_transient() {
        struct BrokenSpider;
        impl Spider for BrokenSpider {
            fn name(&self) -> &str {
                "broken"
            }
            fn parse(
                &self,
                _raw: &str,
                _url: &str,
                _headers: &HashMap<String, String>,
            ) -> crate::spider::SpiderResult<serde_json::Value> {
                Err(crate::spider::SpiderError::Parse("bad markup".to_string()))
            }
        }

        let mut fx = fixture(vec![ScriptedFetcher::ok("x")]);
        let mut registry = SpiderRegistry::with_builtins();
        registry.register(Arc::new(BrokenSpider));
        fx.worker.registry = Arc::new(registry);

        let id = submit(&fx.store, "broken", 3);
        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Transient);
        assert!(job.error.as_ref().unwrap().message.contains("bad markup"));
    }

    #[tokio::test]
    async fn test_wedged_parse_is_bounded_by_timeout() {
        struct WedgedSpider;
        impl Spider for WedgedSpider {
            fn name(&self) -> &str {
                "wedged"
            }
            fn parse(
                &self,
                _raw: &str,
                _url: &str,
                _headers: &HashMap<String, String>,
            ) -> crate::spider::SpiderResult<serde_json::Value> {
                std::thread::sleep(Duration::from_millis(400));
                Ok(serde_json::json!({}))
            }
        }

        let mut fx = fixture(vec![ScriptedFetcher::ok("x")]);
        let mut registry = SpiderRegistry::with_builtins();
        registry.register(Arc::new(WedgedSpider));
        fx.worker.registry = Arc::new(registry);

        let job = Job::new("wedged", "https://example.com/", 3, Duration::from_millis(50));
        let id = fx.store.create(job).unwrap();

        // The attempt returns despite the spider sleeping far past the
        // timeout; the worker is not wedged with it
        let start = std::time::Instant::now();
        fx.worker.process(id).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(300));

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Transient);
        assert!(job.error.as_ref().unwrap().message.contains("timed out"));
        assert_eq!(fx.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_requested_pending_job_is_cancelled() {
        let fx = fixture(vec![]);
        let id = submit(&fx.store, "default", 3);
        fx.store
            .update(id, &mut |job| {
                job.cancel_requested = true;
                Ok(())
            })
            .unwrap();

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.attempt_count, 0);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_duplicate_delivery_discarded() {
        let fx = fixture(vec![ScriptedFetcher::ok("<html></html>")]);
        let id = submit(&fx.store, "default", 3);

        fx.worker.process(id).await.unwrap();
        let before = fx.store.get(id).unwrap();
        assert_eq!(before.status, JobStatus::Completed);

        // Second delivery of the same id is a no-op
        fx.worker.process(id).await.unwrap();
        let after = fx.store.get(id).unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert_eq!(after.finished_at, before.finished_at);
        assert_eq!(after.attempt_count, before.attempt_count);
    }

    #[tokio::test]
    async fn test_recovered_job_does_not_recount_attempt() {
        let fx = fixture(vec![ScriptedFetcher::ok("<html></html>")]);
        let id = submit(&fx.store, "default", 3);

        // Simulate a claim that stalled and was recovered by the reaper
        fx.store
            .update(id, &mut |job| {
                job.status = JobStatus::Running;
                job.attempt_count += 1;
                job.started_at = Some(Utc::now());
                Ok(())
            })
            .unwrap();
        fx.store
            .update(id, &mut |job| {
                job.status = JobStatus::Pending;
                job.recovered = true;
                Ok(())
            })
            .unwrap();

        fx.worker.process(id).await.unwrap();

        let job = fx.store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // Still attempt 1: the resumed attempt is the same attempt
        assert_eq!(job.attempt_count, 1);
        assert!(!job.recovered);
    }
}
