//! Worker module
//!
//! Everything that executes job attempts lives here: the fetch
//! collaborator, the retry/backoff policy, the per-task worker loop, the
//! stall reaper, and the pool that runs them all.

mod fetcher;
mod pool;
mod reaper;
mod retry;
mod runner;

pub use fetcher::{build_http_client, FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use pool::WorkerPool;
pub use reaper::Reaper;
pub use retry::RetryPolicy;
pub use runner::Worker;
