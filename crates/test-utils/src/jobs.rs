use std::sync::{Arc, Mutex};

use jobdispatch::job::{Job, JobHandle};
use jobdispatch::types::{JobError, JobOutput, JobProgress, JobState};

/// Job with canned answers. `run` returns immediately.
pub struct StaticJob {
    name: String,
    outcome: JobState,
    progress: Mutex<Option<JobProgress>>,
    result: Option<String>,
    error: Option<JobError>,
}

impl StaticJob {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: JobState::Completed,
            progress: Mutex::new(None),
            result: None,
            error: None,
        }
    }

    pub fn returning(mut self, state: JobState) -> Self {
        self.outcome = state;
        self
    }

    pub fn with_result(mut self, result: &str) -> Self {
        self.result = Some(result.to_string());
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(JobError::new(message));
        self
    }

    pub fn with_progress(self, done: f32, text: &str) -> Self {
        self.set_progress(done, text);
        self
    }

    pub fn set_progress(&self, done: f32, text: &str) {
        *self.progress.lock().unwrap() = Some(JobProgress::new(done, text));
    }

    pub fn handle(self) -> JobHandle {
        Arc::new(self)
    }
}

impl Job for StaticJob {
    fn run(&self) -> JobState {
        self.outcome
    }

    fn progress(&self) -> Option<JobProgress> {
        self.progress.lock().unwrap().clone()
    }

    fn result(&self) -> Option<JobOutput> {
        self.result
            .clone()
            .map(|r| Arc::new(r) as JobOutput)
    }

    fn error(&self) -> Option<JobError> {
        self.error.clone()
    }

    fn description(&self) -> String {
        self.name.clone()
    }
}
