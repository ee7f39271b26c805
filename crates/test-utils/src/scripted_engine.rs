use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use jobdispatch::errors::{EngineError, Result};
use jobdispatch::exec::{Engine, EngineNotifier, EngineResult};
use jobdispatch::job::{JobHandle, JobKey};
use jobdispatch::types::JobState;
use tracing::debug;

/// One call the dispatcher made into a [`ScriptedEngine`], with the job
/// description where there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Start(String),
    Cancel(String),
    Suspend(String),
    Resume(String),
    JobState(String),
    RequestCancel,
    ShutDown,
}

#[derive(Default)]
struct Script {
    calls: Vec<EngineCall>,
    busy_starts: u32,
    start_error: Option<EngineError>,
    cancel_error: Option<EngineError>,
    suspend_error: Option<EngineError>,
    states: HashMap<JobKey, JobState>,
}

impl Script {
    fn record(&mut self, call: EngineCall) {
        debug!(?call, "scripted engine call");
        self.calls.push(call);
    }
}

/// An engine that never runs anything by itself.
///
/// - records every call
/// - can answer `Busy` a number of times, or fail the next start, cancel or
///   suspend
/// - tests drive job completion with [`ScriptedEngine::complete`] (active) or
///   [`ScriptedEngine::set_state`] (passive)
pub struct ScriptedEngine {
    active: bool,
    script: Mutex<Script>,
    notifier: Mutex<Option<EngineNotifier>>,
}

impl ScriptedEngine {
    pub fn active() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    pub fn passive() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    fn new(active: bool) -> Self {
        Self {
            active,
            script: Mutex::new(Script::default()),
            notifier: Mutex::new(None),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Answer the next `n` start requests with `Busy`.
    pub fn busy_for(&self, n: u32) {
        self.script().busy_starts = n;
    }

    pub fn fail_next_start(&self, err: EngineError) {
        self.script().start_error = Some(err);
    }

    pub fn fail_next_cancel(&self, err: EngineError) {
        self.script().cancel_error = Some(err);
    }

    pub fn fail_next_suspend(&self, err: EngineError) {
        self.script().suspend_error = Some(err);
    }

    /// Set the state returned by `job_state` polls.
    pub fn set_state(&self, job: &JobHandle, state: JobState) {
        self.script().states.insert(JobKey::of(job), state);
    }

    /// Report a state change through the attached notifier, as an active
    /// engine would from its worker thread.
    pub fn complete(&self, job: &JobHandle, state: JobState) -> Result<()> {
        self.set_state(job, state);
        let notifier = self
            .notifier
            .lock()
            .unwrap()
            .clone()
            .expect("no notifier attached; is the engine active and registered?");
        notifier.job_state_changed(job, state)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.script().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.script().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn start_calls(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Start(_)))
    }

    pub fn cancel_calls(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Cancel(_)))
    }

    pub fn is_attached(&self) -> bool {
        self.notifier.lock().unwrap().is_some()
    }
}

impl Engine for ScriptedEngine {
    fn start_job(
        &self,
        job: &JobHandle,
        _params: Option<&(dyn Any + Send + Sync)>,
    ) -> EngineResult<()> {
        let mut script = self.script();
        script.record(EngineCall::Start(job.description()));

        if script.busy_starts > 0 {
            script.busy_starts -= 1;
            return Err(EngineError::Busy);
        }
        if let Some(err) = script.start_error.take() {
            return Err(err);
        }

        script.states.insert(JobKey::of(job), JobState::Running);
        Ok(())
    }

    fn cancel_job(&self, job: &JobHandle) -> EngineResult<()> {
        let mut script = self.script();
        script.record(EngineCall::Cancel(job.description()));

        if let Some(err) = script.cancel_error.take() {
            return Err(err);
        }
        match script.states.get(&JobKey::of(job)) {
            Some(s) if !s.is_terminal() => Ok(()),
            Some(s) => Err(EngineError::InvalidOperation(format!("job already {s}"))),
            None => Err(EngineError::UnknownJob),
        }
    }

    fn suspend_job(&self, job: &JobHandle) -> EngineResult<()> {
        let mut script = self.script();
        script.record(EngineCall::Suspend(job.description()));

        if let Some(err) = script.suspend_error.take() {
            return Err(err);
        }
        script.states.insert(JobKey::of(job), JobState::Suspended);
        Ok(())
    }

    fn resume_job(&self, job: &JobHandle) -> EngineResult<()> {
        let mut script = self.script();
        script.record(EngineCall::Resume(job.description()));
        script.states.insert(JobKey::of(job), JobState::Running);
        Ok(())
    }

    fn job_state(&self, job: &JobHandle) -> EngineResult<JobState> {
        let mut script = self.script();
        script.record(EngineCall::JobState(job.description()));
        script
            .states
            .get(&JobKey::of(job))
            .copied()
            .ok_or(EngineError::UnknownJob)
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn attach(&self, notifier: EngineNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }

    fn request_cancel(&self) {
        self.script().record(EngineCall::RequestCancel);
    }

    fn shut_down(&self) -> EngineResult<()> {
        self.script().record(EngineCall::ShutDown);
        Ok(())
    }
}
