// src/job.rs

//! The job capability consumed by the dispatcher.

use std::sync::Arc;

use crate::types::{JobError, JobOutput, JobProgress, JobState};

/// A caller-supplied unit of work.
///
/// Engines call [`Job::run`]; the dispatcher itself only reads progress,
/// results, errors and the description.
pub trait Job: Send + Sync {
    /// Execute the job on the calling thread and return its final state.
    fn run(&self) -> JobState;

    fn progress(&self) -> Option<JobProgress> {
        None
    }

    fn result(&self) -> Option<JobOutput> {
        None
    }

    fn error(&self) -> Option<JobError> {
        None
    }

    fn description(&self) -> String;

    /// Ask the job to stop at its next opportunity. Jobs are free to ignore it.
    fn request_cancel(&self) {}
}

/// Shared handle to a job. Callers keep their own clone.
pub type JobHandle = Arc<dyn Job>;

/// Identity of a job instance, used to reject double registration and to map
/// engine callbacks back to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey(usize);

impl JobKey {
    pub fn of(job: &JobHandle) -> Self {
        JobKey(Arc::as_ptr(job) as *const () as usize)
    }
}
