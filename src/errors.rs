// src/errors.rs

//! Crate-wide error types.
//!
//! [`DispatchError`] is what callers of the dispatcher see. [`EngineError`] is
//! what engine implementations report back; the dispatcher classifies and
//! wraps it before surfacing it.

use thiserror::Error;

use crate::types::{JobId, JobState};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("engine \"{0}\" is not registered")]
    UnknownEngine(String),

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("job {0} is not registered")]
    UnknownJob(JobId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("engine is busy, try again")]
    EngineBusy,

    #[error("{context}: {source}")]
    EngineFailed {
        context: String,
        #[source]
        source: EngineError,
    },

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    /// Wrap an engine-originated error with context naming the job.
    ///
    /// `Busy` and unclassified errors keep their own kinds.
    pub fn from_engine(context: impl Into<String>, err: EngineError) -> Self {
        match err {
            EngineError::Busy => DispatchError::EngineBusy,
            EngineError::Other(e) => DispatchError::Fatal(format!("{}: {e:#}", context.into())),
            other => DispatchError::EngineFailed {
                context: context.into(),
                source: other,
            },
        }
    }

    pub(crate) fn invalid_transition(descr: &str, from: JobState, to: JobState) -> Self {
        DispatchError::InvalidOperation(format!(
            "job {descr}: transition from {from} to {to} is invalid"
        ))
    }

    /// True for errors a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::EngineBusy)
    }
}

/// Errors reported by engine implementations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine cannot take the request right now.
    #[error("engine busy")]
    Busy,

    #[error("engine does not know the job")]
    UnknownJob,

    #[error("operation not supported in the current state: {0}")]
    InvalidOperation(String),

    #[error("engine failure: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Outcomes that are expected when racing a job that is finishing anyway.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, EngineError::UnknownJob | EngineError::InvalidOperation(_))
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
