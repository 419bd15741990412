/// Job status definitions for tracking lifecycle progress
///
/// This module defines all possible states a job can be in, and which
/// transitions between them are legal.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a job in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    // ===== Active States =====
    /// Job has been created and is waiting in the queue
    Pending,

    /// Job is currently being executed by a worker
    Running,

    // ===== Terminal States =====
    /// Job finished successfully and has a result
    Completed,

    /// Job exhausted its attempts or hit a permanent error
    Failed,

    /// Job was cancelled before a worker picked it up
    Cancelled,
}

impl JobStatus {
    /// Returns true if this is a terminal state (no further transitions permitted)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if this is an active state (job may still make progress)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if a transition from `self` to `to` is legal.
    ///
    /// The machine is `pending -> running -> {completed, failed}`, with two
    /// extra edges: `running -> pending` (retry re-enqueue and reaper
    /// recovery) and `pending -> cancelled`. A no-op transition to the same
    /// active state is legal so that field-only updates pass validation.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == to {
            return true;
        }
        match (self, to) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Cancelled) => true,
            (Self::Running, Self::Completed) => true,
            (Self::Running, Self::Failed) => true,
            (Self::Running, Self::Pending) => true,
            _ => false,
        }
    }

    /// Converts the status to its stable string representation
    ///
    /// This is the form used in persisted job records and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a status from its string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
