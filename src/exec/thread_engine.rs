// src/exec/thread_engine.rs

//! Local engine running jobs on the tokio blocking pool.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::exec::backend::{Engine, EngineNotifier, EngineResult};
use crate::job::{JobHandle, JobKey};
use crate::types::{EngineMode, JobState};

/// A job currently known to the engine.
struct Tracked {
    job: JobHandle,
    state: JobState,
}

struct Shared {
    name: String,
    mode: EngineMode,
    jobs: Mutex<HashMap<JobKey, Tracked>>,
    notifier: Mutex<Option<EngineNotifier>>,
    closed: AtomicBool,
}

impl Shared {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobKey, Tracked>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called on the worker thread once `Job::run` returned.
    fn finish(&self, job: &JobHandle, state: JobState) {
        let state = if state.is_terminal() {
            state
        } else {
            warn!(
                engine = %self.name,
                job = %job.description(),
                %state,
                "job returned a non-terminal state; reporting it as failed"
            );
            JobState::Failed
        };

        info!(engine = %self.name, job = %job.description(), %state, "job finished");

        match self.mode {
            EngineMode::Passive => {
                // Keep the terminal state until the dispatcher polls it.
                if let Some(tracked) = self.jobs().get_mut(&JobKey::of(job)) {
                    tracked.state = state;
                }
            }
            EngineMode::Active => {
                self.jobs().remove(&JobKey::of(job));
                self.notify(job, state);
            }
        }
    }

    fn notify(&self, job: &JobHandle, state: JobState) {
        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(notifier) = notifier else {
            warn!(engine = %self.name, "active engine has no notifier attached; dropping notification");
            return;
        };

        match notifier.job_state_changed(job, state) {
            Ok(()) => {}
            // Still queued inside the dispatcher; the next flush delivers it.
            Err(e) if e.is_transient() => {
                debug!(engine = %self.name, "dispatcher busy; notification left queued");
            }
            Err(e) => {
                warn!(engine = %self.name, error = %e, "dispatcher rejected job notification");
            }
        }
    }
}

/// Engine that runs each job on the tokio blocking pool, with at most
/// `workers` jobs in flight at a time.
///
/// - In [`EngineMode::Active`] finished jobs are reported through the
///   attached [`EngineNotifier`].
/// - In [`EngineMode::Passive`] the engine only remembers the final state and
///   answers [`Engine::job_state`] polls; the entry is dropped once a
///   terminal state has been read.
///
/// Cancellation is forwarded to [`crate::job::Job::request_cancel`].
/// Suspension is not supported.
pub struct ThreadEngine {
    workers: usize,
    runtime: Handle,
    shared: Arc<Shared>,
}

impl ThreadEngine {
    pub fn new(name: impl Into<String>, workers: usize, mode: EngineMode, runtime: Handle) -> Self {
        Self {
            workers: workers.max(1),
            runtime,
            shared: Arc::new(Shared {
                name: name.into(),
                mode,
                jobs: Mutex::new(HashMap::new()),
                notifier: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Active engine on the current tokio runtime.
    ///
    /// Panics outside of a tokio runtime, like `Handle::current`.
    pub fn active(name: impl Into<String>, workers: usize) -> Self {
        Self::new(name, workers, EngineMode::Active, Handle::current())
    }

    /// Passive engine on the current tokio runtime.
    pub fn passive(name: impl Into<String>, workers: usize) -> Self {
        Self::new(name, workers, EngineMode::Passive, Handle::current())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of jobs currently executing.
    pub fn running_jobs(&self) -> usize {
        self.shared
            .jobs()
            .values()
            .filter(|t| t.state == JobState::Running)
            .count()
    }
}

impl Engine for ThreadEngine {
    fn start_job(
        &self,
        job: &JobHandle,
        _params: Option<&(dyn Any + Send + Sync)>,
    ) -> EngineResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(EngineError::InvalidOperation(format!(
                "engine \"{}\" is shut down",
                self.shared.name
            )));
        }

        {
            let mut jobs = self.shared.jobs();
            let running = jobs
                .values()
                .filter(|t| t.state == JobState::Running)
                .count();
            if running >= self.workers {
                return Err(EngineError::Busy);
            }

            let key = JobKey::of(job);
            if matches!(jobs.get(&key), Some(t) if t.state == JobState::Running) {
                return Err(EngineError::InvalidOperation(
                    "job is already running on this engine".to_string(),
                ));
            }
            jobs.insert(
                key,
                Tracked {
                    job: Arc::clone(job),
                    state: JobState::Running,
                },
            );
        }

        debug!(engine = %self.shared.name, job = %job.description(), "spawning job");

        let shared = Arc::clone(&self.shared);
        let job = Arc::clone(job);
        self.runtime.spawn_blocking(move || {
            let state = job.run();
            shared.finish(&job, state);
        });

        Ok(())
    }

    fn cancel_job(&self, job: &JobHandle) -> EngineResult<()> {
        let jobs = self.shared.jobs();
        match jobs.get(&JobKey::of(job)) {
            Some(t) if t.state == JobState::Running => {
                debug!(engine = %self.shared.name, job = %job.description(), "forwarding cancel request");
                t.job.request_cancel();
                Ok(())
            }
            Some(t) => Err(EngineError::InvalidOperation(format!(
                "job already {}",
                t.state
            ))),
            None => Err(EngineError::UnknownJob),
        }
    }

    fn suspend_job(&self, _job: &JobHandle) -> EngineResult<()> {
        Err(EngineError::InvalidOperation(
            "thread engine cannot suspend jobs".to_string(),
        ))
    }

    fn resume_job(&self, _job: &JobHandle) -> EngineResult<()> {
        Err(EngineError::InvalidOperation(
            "thread engine cannot resume jobs".to_string(),
        ))
    }

    fn job_state(&self, job: &JobHandle) -> EngineResult<JobState> {
        let mut jobs = self.shared.jobs();
        let key = JobKey::of(job);
        let state = jobs.get(&key).map(|t| t.state).ok_or(EngineError::UnknownJob)?;
        if state.is_terminal() {
            jobs.remove(&key);
        }
        Ok(state)
    }

    fn is_active(&self) -> bool {
        self.shared.mode == EngineMode::Active
    }

    fn attach(&self, notifier: EngineNotifier) {
        *self
            .shared
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notifier);
    }

    fn request_cancel(&self) {
        let jobs = self.shared.jobs();
        info!(engine = %self.shared.name, jobs = jobs.len(), "cancelling all jobs");
        for t in jobs.values().filter(|t| t.state == JobState::Running) {
            t.job.request_cancel();
        }
    }

    fn shut_down(&self) -> EngineResult<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.request_cancel();
        self.shared
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(engine = %self.shared.name, "engine shut down");
        Ok(())
    }
}
