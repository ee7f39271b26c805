// src/exec/backend.rs

//! Pluggable engine abstraction.
//!
//! The dispatcher talks to an [`Engine`] instead of running jobs itself. This
//! makes it possible to register several independent backends side by side
//! (a local thread engine, a remote engine, a fake engine in tests) and route
//! each job to one of them by name.
//!
//! - Active engines receive an [`EngineNotifier`] through [`Engine::attach`]
//!   and push state changes whenever a job finishes.
//! - Passive engines never push anything; the dispatcher polls them through
//!   [`Engine::job_state`].

use std::any::Any;
use std::sync::{Arc, Weak};

use crate::dispatch::dispatcher::DispatcherCore;
use crate::errors::{DispatchError, EngineError, Result};
use crate::job::JobHandle;
use crate::types::JobState;

/// Opaque, engine-specific start parameters.
pub type EngineParams = Arc<dyn Any + Send + Sync>;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Trait abstracting how jobs are executed.
///
/// None of these methods is ever called while the dispatcher holds its main
/// lock, so implementations may call back into the dispatcher synchronously.
pub trait Engine: Send + Sync {
    /// Begin executing `job`. Returning [`EngineError::Busy`] makes the
    /// dispatcher retry with backoff.
    fn start_job(&self, job: &JobHandle, params: Option<&(dyn Any + Send + Sync)>)
        -> EngineResult<()>;

    /// Ask the engine to cancel `job`. Cancellation is cooperative; the engine
    /// reports `Canceled` (or any other terminal state) once the job stops.
    fn cancel_job(&self, job: &JobHandle) -> EngineResult<()>;

    fn suspend_job(&self, job: &JobHandle) -> EngineResult<()>;

    fn resume_job(&self, job: &JobHandle) -> EngineResult<()>;

    /// Engine's own view of the job state, used to poll passive engines.
    fn job_state(&self, job: &JobHandle) -> EngineResult<JobState>;

    /// Active engines push state changes through the attached notifier.
    fn is_active(&self) -> bool;

    /// Wire an active engine to the dispatcher. Called once, on registration,
    /// while the engine registry is locked; keep it cheap.
    fn attach(&self, _notifier: EngineNotifier) {}

    /// Best-effort request to cancel everything the engine is running.
    fn request_cancel(&self);

    fn shut_down(&self) -> EngineResult<()>;
}

pub type EngineHandle = Arc<dyn Engine>;

/// Handle through which an active engine reports job state changes.
///
/// It holds only a weak reference, so an engine never keeps a dispatcher
/// alive on its own. Notifications sent after the dispatcher is gone are
/// dropped.
#[derive(Clone)]
pub struct EngineNotifier {
    core: Weak<DispatcherCore>,
    engine: String,
}

impl std::fmt::Debug for EngineNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineNotifier")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl EngineNotifier {
    pub(crate) fn new(core: Weak<DispatcherCore>, engine: impl Into<String>) -> Self {
        Self {
            core,
            engine: engine.into(),
        }
    }

    pub fn engine_name(&self) -> &str {
        &self.engine
    }

    /// Report that `job` moved to `state`.
    ///
    /// Safe to call from any thread. Returns once the notification has been
    /// validated and delivered to the job's listener, or
    /// [`DispatchError::EngineBusy`] if the pipeline could not be flushed in
    /// time. The event stays queued in that case and is delivered by the
    /// next flush; do not send it again.
    pub fn job_state_changed(&self, job: &JobHandle, state: JobState) -> Result<()> {
        match self.core.upgrade() {
            Some(core) => core.on_engine_job_state_changed(&self.engine, job, state),
            None => Err(DispatchError::InvalidOperation(
                "dispatcher has been dropped".to_string(),
            )),
        }
    }
}
