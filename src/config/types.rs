use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Fetchmill
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Worker pool and reaper behavior
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long a worker blocks on an empty queue before re-checking for
    /// shutdown (milliseconds)
    #[serde(rename = "queue-poll-interval-ms", default = "default_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// A running job untouched for longer than this is considered stalled
    /// and re-enqueued by the reaper (seconds)
    #[serde(rename = "stall-threshold-secs", default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,

    /// Time between reaper sweeps (seconds)
    #[serde(rename = "reaper-interval-secs", default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_poll_interval_ms: default_poll_interval_ms(),
            stall_threshold_secs: default_stall_threshold_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

/// HTTP fetch behavior
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Default per-request timeout (seconds); submissions may override
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent string sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Non-2xx statuses treated as permanent failures (never retried).
    /// Every other non-2xx status is transient.
    #[serde(
        rename = "permanent-status-codes",
        default = "default_permanent_status_codes"
    )]
    pub permanent_status_codes: Vec<u16>,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns true if this HTTP status is classified as permanent
    pub fn is_permanent_status(&self, status: u16) -> bool {
        self.permanent_status_codes.contains(&status)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            permanent_status_codes: default_permanent_status_codes(),
        }
    }
}

/// Retry delay strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

/// Retry/backoff policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Default attempt ceiling; submissions may override
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_strategy")]
    pub strategy: RetryStrategy,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor per attempt for the exponential strategy
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Delay ceiling (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: default_strategy(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

/// Job store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Directory holding job records for the file backend
    #[serde(rename = "jobs-dir", default = "default_jobs_dir")]
    pub jobs_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            jobs_dir: default_jobs_dir(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stall_threshold_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("fetchmill/{}", env!("CARGO_PKG_VERSION"))
}

fn default_permanent_status_codes() -> Vec<u16> {
    vec![400, 401, 403, 404, 410]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_strategy() -> RetryStrategy {
    RetryStrategy::Exponential
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_jobs_dir() -> String {
    "jobs".to_string()
}
