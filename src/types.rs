// src/types.rs

//! Core value types shared by the dispatcher, engines and listeners.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

/// Identifier assigned to a job when the dispatcher accepts it.
///
/// Ids are allocated from a monotonically increasing counter and are never
/// reused for the lifetime of a dispatcher. `0` is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl JobId {
    pub const INVALID: JobId = JobId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job as tracked by the dispatcher.
///
/// `Completed`, `Failed` and `Canceled` are terminal: once a job reaches one
/// of them, no further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Invalid,
    Running,
    Suspended,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Invalid => "invalid",
            JobState::Running => "running",
            JobState::Suspended => "suspended",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of how far a job has progressed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    /// Normalised completion in `0.0..=1.0`.
    pub done: f32,
    /// Human-readable status line.
    pub text: String,
}

impl JobProgress {
    pub fn new(done: f32, text: impl Into<String>) -> Self {
        Self {
            done: done.clamp(0.0, 1.0),
            text: text.into(),
        }
    }
}

/// Error information reported by a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Diagnostic attached to failed jobs that did not report their own error.
    pub fn unspecified() -> Self {
        Self::new("job failed with unspecified error")
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Opaque result value produced by a completed job.
pub type JobOutput = Arc<dyn Any + Send + Sync>;

/// Whether an engine pushes state changes or has to be polled for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Active,
    Passive,
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(EngineMode::Active),
            "passive" => Ok(EngineMode::Passive),
            other => Err(format!(
                "invalid engine mode: {other} (expected \"active\" or \"passive\")"
            )),
        }
    }
}
