use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobdispatch::listener::JobListener;
use jobdispatch::types::{JobId, JobProgress, JobState};

use crate::wait_until;

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    State(JobId, JobState),
    Progress(JobId, JobProgress),
}

type StateHook = Box<dyn Fn(JobId, JobState) + Send + Sync>;

/// Listener that keeps every notification it receives, in order.
///
/// An optional hook runs after each state notification has been recorded;
/// tests use it to call back into the dispatcher from inside a callback.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
    hook: Option<StateHook>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_hook(hook: impl Fn(JobId, JobState) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            hook: Some(Box::new(hook)),
        })
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn states_for(&self, id: JobId) -> Vec<JobState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::State(i, s) if i == id => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn progress_for(&self, id: JobId) -> Vec<JobProgress> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(i, p) if i == id => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Block until `id` has been reported in `state`.
    pub fn wait_for_state(&self, id: JobId, state: JobState, limit: Duration) -> bool {
        wait_until(limit, || self.states_for(id).contains(&state))
    }
}

impl JobListener for RecordingListener {
    fn on_job_state_changed(&self, id: JobId, state: JobState) {
        self.events.lock().unwrap().push(Recorded::State(id, state));
        if let Some(hook) = &self.hook {
            hook(id, state);
        }
    }

    fn on_job_progress(&self, id: JobId, progress: &JobProgress) {
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Progress(id, progress.clone()));
    }
}

/// Listener that panics on every state notification.
pub struct PanickingListener;

impl JobListener for PanickingListener {
    fn on_job_state_changed(&self, id: JobId, state: JobState) {
        panic!("listener exploded on job {id} -> {state}");
    }
}
