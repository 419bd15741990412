//! Worker pool orchestration
//!
//! The pool owns the shared engine components and runs the worker tasks
//! plus the reaper. Shutdown is cooperative: a watch signal stops new
//! dequeues immediately while attempts already in flight run to their
//! state transition.

use crate::config::Config;
use crate::queue::Queue;
use crate::spider::SpiderRegistry;
use crate::store::JobStore;
use crate::worker::fetcher::Fetcher;
use crate::worker::reaper::Reaper;
use crate::worker::retry::RetryPolicy;
use crate::worker::runner::Worker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns and runs the worker tasks and the reaper
pub struct WorkerPool<S, Q, F> {
    store: Arc<S>,
    queue: Arc<Q>,
    registry: Arc<SpiderRegistry>,
    fetcher: Arc<F>,
    config: Config,
    retry: RetryPolicy,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl<S, Q, F> WorkerPool<S, Q, F>
where
    S: JobStore,
    Q: Queue,
    F: Fetcher,
{
    /// Creates a pool; nothing runs until `start` is called
    pub fn new(
        store: Arc<S>,
        queue: Arc<Q>,
        registry: Arc<SpiderRegistry>,
        fetcher: Arc<F>,
        config: Config,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            store,
            queue,
            registry,
            fetcher,
            config,
            retry,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawns the worker tasks and the reaper
    pub fn start(&mut self) {
        let workers = self.config.engine.workers;
        tracing::info!("Starting {} worker(s)", workers);

        for id in 0..workers {
            let worker = Worker::new(
                id,
                Arc::clone(&self.store),
                Arc::clone(&self.queue),
                Arc::clone(&self.registry),
                Arc::clone(&self.fetcher),
                self.retry.clone(),
                self.config.fetch.clone(),
                self.config.engine.poll_interval(),
                self.shutdown_tx.subscribe(),
            );
            self.handles.push(tokio::spawn(worker.run()));
        }

        let reaper = Reaper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            self.config.engine.stall_threshold(),
            self.config.engine.reaper_interval(),
            self.shutdown_tx.subscribe(),
        );
        self.handles.push(tokio::spawn(reaper.run()));
    }

    /// Signals shutdown and waits for every task to finish its in-flight
    /// attempt and exit
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down worker pool");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}
