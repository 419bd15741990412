//! Job data model
//!
//! This module defines the job record tracked by the store, the error
//! taxonomy attached to failed attempts, and the validation rules that make
//! every visible state transition obey the lifecycle machine.

mod status;

pub use status::JobStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Opaque unique job identifier, assigned at creation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failure, timeout, retryable HTTP status, or parse failure.
    /// Retried until the attempt ceiling is reached.
    Transient,

    /// Unregistered spider, invalid configuration, or an HTTP status the
    /// configuration classifies as permanent. Never retried.
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error recorded on a job after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// A single submitted fetch-and-parse job and its tracked lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, immutable
    pub id: JobId,

    /// Name of the registered spider to run, immutable
    pub spider_name: String,

    /// Target URL for the fetch
    pub url: String,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Number of fetch+parse attempts made so far
    pub attempt_count: u32,

    /// Configured attempt ceiling, immutable
    pub max_attempts: u32,

    /// Per-request fetch timeout in milliseconds
    pub timeout_ms: u64,

    /// Set at creation, never rewritten
    pub created_at: DateTime<Utc>,

    /// Set when the first attempt starts, never rewritten
    pub started_at: Option<DateTime<Utc>>,

    /// Set when the job reaches a terminal state, never rewritten
    pub finished_at: Option<DateTime<Utc>>,

    /// Touched on every committed update; the reaper uses this to detect
    /// stalled running jobs
    pub updated_at: DateTime<Utc>,

    /// Structured parse output, present iff completed
    pub result: Option<serde_json::Value>,

    /// Last failure, present iff failed or a retry occurred
    pub error: Option<JobError>,

    /// Cooperative cancellation request, honored at attempt boundaries
    #[serde(default)]
    pub cancel_requested: bool,

    /// Set by the reaper when a stalled job is re-enqueued; the next claim
    /// skips the attempt increment because it resumes the same attempt
    #[serde(default)]
    pub recovered: bool,
}

impl Job {
    /// Creates a new pending job record
    pub fn new(
        spider_name: impl Into<String>,
        url: impl Into<String>,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            spider_name: spider_name.into(),
            url: url.into(),
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts,
            timeout_ms: timeout.as_millis() as u64,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            result: None,
            error: None,
            cancel_requested: false,
            recovered: false,
        }
    }

    /// Returns the fetch timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns true if another attempt may still be made after a transient
    /// failure
    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Validates a proposed update of `old` into `new`.
///
/// This is the single enforcement point for the lifecycle invariants; both
/// store backends call it before committing a mutation. Returns a
/// description of the violated rule on failure.
pub fn validate_update(old: &Job, new: &Job) -> std::result::Result<(), String> {
    if new.id != old.id {
        return Err("job id is immutable".to_string());
    }
    if new.spider_name != old.spider_name {
        return Err("spider_name is immutable".to_string());
    }
    if new.max_attempts != old.max_attempts {
        return Err("max_attempts is immutable".to_string());
    }
    if new.created_at != old.created_at {
        return Err("created_at is immutable".to_string());
    }

    if !old.status.can_transition(new.status) {
        return Err(format!(
            "illegal status transition {} -> {}",
            old.status, new.status
        ));
    }

    if new.attempt_count < old.attempt_count {
        return Err("attempt_count may not decrease".to_string());
    }
    if new.attempt_count > new.max_attempts {
        return Err(format!(
            "attempt_count {} exceeds max_attempts {}",
            new.attempt_count, new.max_attempts
        ));
    }

    // Timestamps are set exactly once, never rewound
    if old.started_at.is_some() && new.started_at != old.started_at {
        return Err("started_at is set exactly once".to_string());
    }
    if old.finished_at.is_some() && new.finished_at != old.finished_at {
        return Err("finished_at is set exactly once".to_string());
    }

    // A terminal status must carry its timestamp; results only on success
    if new.status.is_terminal() && new.finished_at.is_none() {
        return Err("terminal job must have finished_at set".to_string());
    }
    if new.result.is_some() && new.status != JobStatus::Completed {
        return Err("result is only present on completed jobs".to_string());
    }

    Ok(())
}
