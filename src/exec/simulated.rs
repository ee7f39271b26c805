// src/exec/simulated.rs

//! Step-based job used by the demo host and by engine tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::job::Job;
use crate::types::{JobError, JobOutput, JobProgress, JobState};

/// A job that sleeps through a fixed number of steps.
///
/// It checks for cancellation between steps, can be told to fail at a given
/// step, and reports `steps_done / steps` as progress.
pub struct SimulatedJob {
    name: String,
    steps: u32,
    step: Duration,
    fail_at_step: Option<u32>,
    done: AtomicU32,
    cancel_requested: AtomicBool,
    error: Mutex<Option<JobError>>,
    result: Mutex<Option<JobOutput>>,
}

impl SimulatedJob {
    pub fn new(name: impl Into<String>, steps: u32, step: Duration) -> Self {
        Self {
            name: name.into(),
            steps: steps.max(1),
            step,
            fail_at_step: None,
            done: AtomicU32::new(0),
            cancel_requested: AtomicBool::new(false),
            error: Mutex::new(None),
            result: Mutex::new(None),
        }
    }

    /// Make the job fail when it reaches `step` (zero-based).
    pub fn failing_at(mut self, step: u32) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    pub fn steps_done(&self) -> u32 {
        self.done.load(Ordering::Acquire)
    }
}

impl Job for SimulatedJob {
    fn run(&self) -> JobState {
        for i in 0..self.steps {
            if self.cancel_requested.load(Ordering::Acquire) {
                debug!(job = %self.name, step = i, "cancellation observed");
                return JobState::Canceled;
            }
            if self.fail_at_step == Some(i) {
                *self.error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(JobError::new(format!("{} failed at step {i}", self.name)));
                return JobState::Failed;
            }
            std::thread::sleep(self.step);
            self.done.store(i + 1, Ordering::Release);
        }

        let summary = format!("{}: {} steps done", self.name, self.steps);
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(summary));
        JobState::Completed
    }

    fn progress(&self) -> Option<JobProgress> {
        let done = self.steps_done();
        Some(JobProgress::new(
            done as f32 / self.steps as f32,
            format!("step {done}/{}", self.steps),
        ))
    }

    fn result(&self) -> Option<JobOutput> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn error(&self) -> Option<JobError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }
}
