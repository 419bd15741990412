//! Fetchmill: a single-node fetch-and-parse job engine
//!
//! This crate implements a job lifecycle engine for single-URL crawl jobs:
//! a caller submits a job naming a registered spider, worker tasks fetch and
//! parse the page, and the job record moves through an enforced state machine
//! from submission to a terminal outcome. Retries are bounded and backed off,
//! and a reaper recovers jobs whose worker crashed mid-attempt.

pub mod config;
pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod spider;
pub mod store;
pub mod worker;

use thiserror::Error;

/// Main error type for Fetchmill operations
#[derive(Debug, Error)]
pub enum MillError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Spider error: {0}")]
    Spider(#[from] spider::SpiderError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] worker::FetchError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for Fetchmill operations
pub type Result<T> = std::result::Result<T, MillError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{Dispatcher, JobOutcome, SubmitOptions};
pub use job::{ErrorKind, Job, JobError, JobId, JobStatus};
pub use spider::{Spider, SpiderRegistry};
pub use store::JobStore;
pub use worker::WorkerPool;
