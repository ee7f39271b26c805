// src/dispatch/dispatcher.rs

//! The dispatcher: job registration, control operations and queries.
//!
//! Locking:
//!
//! - The engine registry has its own lock.
//! - Records and the poll queue live together under the main lock.
//! - The notification pipeline has its own pre-queue lock and flush lock
//!   (see [`crate::dispatch::pipeline`]).
//!
//! Engines and listeners are never called while the main lock is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::DispatcherSettings;
use crate::dispatch::cancel::CancellationSet;
use crate::dispatch::pipeline::{EventKind, EventTarget, Origin, PreQueue};
use crate::dispatch::poll_queue::{PollMode, PollQueue};
use crate::dispatch::record::{JobRecord, JobTable, clamp_report_period};
use crate::dispatch::registry::{EngineEntry, EngineRegistry};
use crate::errors::{DispatchError, EngineError, Result};
use crate::exec::{EngineHandle, EngineNotifier, EngineParams};
use crate::job::{JobHandle, JobKey};
use crate::listener::{JobListener, ListenerHandle};
use crate::types::{JobError, JobId, JobOutput, JobProgress, JobState};

/// State guarded by the main lock.
#[derive(Default)]
pub(crate) struct MainState {
    pub(crate) jobs: JobTable,
    pub(crate) poll: PollQueue,
}

/// Shared dispatcher internals. Engines reach it through a weak reference
/// held by their [`EngineNotifier`].
pub(crate) struct DispatcherCore {
    pub(crate) settings: DispatcherSettings,
    engines: EngineRegistry,
    main: Mutex<MainState>,
    pub(crate) pre_queue: PreQueue,
    pub(crate) flush_lock: Mutex<()>,
    cancelled: CancellationSet,
    shutting_down: AtomicBool,
    muted: AtomicBool,
}

impl DispatcherCore {
    fn new(settings: DispatcherSettings) -> Self {
        Self {
            settings,
            engines: EngineRegistry::new(),
            main: Mutex::new(MainState::default()),
            pre_queue: PreQueue::default(),
            flush_lock: Mutex::new(()),
            cancelled: CancellationSet::new(),
            shutting_down: AtomicBool::new(false),
            muted: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock_main(&self) -> MutexGuard<'_, MainState> {
        self.main.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}

/// Options for [`Dispatcher::start`].
///
/// ```
/// use jobdispatch::dispatch::StartOptions;
///
/// let opts = StartOptions::new().report_period(5).auto_delete(true);
/// assert_eq!(opts.requested_report_period(), 5);
/// ```
#[derive(Clone, Default)]
pub struct StartOptions {
    listener: Option<ListenerHandle>,
    report_period: u32,
    auto_delete: bool,
    params: Option<EngineParams>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(mut self, listener: ListenerHandle) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Progress report period in time units. `0` disables periodic progress;
    /// small values are raised to the configured minimum.
    pub fn report_period(mut self, units: u32) -> Self {
        self.report_period = units;
        self
    }

    /// Drop the record as soon as the job reaches a terminal state.
    pub fn auto_delete(mut self, yes: bool) -> Self {
        self.auto_delete = yes;
        self
    }

    /// Engine-specific parameters, passed through untouched.
    pub fn params(mut self, params: EngineParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn requested_report_period(&self) -> u32 {
        self.report_period
    }
}

/// Routes jobs to named engines and tracks them until they finish.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherSettings::default())
    }
}

impl Dispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        Self {
            core: Arc::new(DispatcherCore::new(settings)),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.core.settings
    }

    /// Register `engine` under `name`. Returns `false` (and keeps the
    /// existing engine) if the name is taken.
    pub fn register_engine(&self, name: &str, engine: EngineHandle) -> bool {
        let core = Arc::downgrade(&self.core);
        self.core
            .engines
            .register(name, engine, || EngineNotifier::new(core, name))
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.core.engines.names()
    }

    /// Start `job` on the engine registered as `engine_name`.
    ///
    /// The job is in `Running` as soon as this returns. A job instance can be
    /// registered only once at a time.
    pub fn start(&self, job: JobHandle, engine_name: &str, options: StartOptions) -> Result<JobId> {
        if self.core.is_shutting_down() {
            return Err(shutting_down());
        }

        let entry = self
            .core
            .engines
            .lookup(engine_name)
            .ok_or_else(|| DispatchError::UnknownEngine(engine_name.to_string()))?;

        let descr = job.description();
        let StartOptions {
            listener,
            report_period,
            auto_delete,
            params,
        } = options;
        let report_period = clamp_report_period(report_period, self.core.settings.min_report_period);

        let id = {
            let mut main = self.core.lock_main();

            if self.core.is_shutting_down() {
                return Err(shutting_down());
            }
            if main.jobs.contains_job(JobKey::of(&job)) {
                return Err(DispatchError::AlreadyRegistered(format!("job {descr}")));
            }

            let id = main.jobs.allocate_id();
            main.jobs.insert(JobRecord {
                id,
                job: Arc::clone(&job),
                state: JobState::Running,
                engine: Arc::clone(&entry.engine),
                engine_name: entry.name.clone(),
                listener,
                report_period,
                auto_delete,
                passive_engine: !entry.active,
                progress: None,
                progress_scheduled: false,
            });
            id
        };

        if let Err(e) = self.submit_to_engine(&job, &entry, params.as_deref()) {
            self.core.lock_main().jobs.remove(id);
            error!(job_id = %id, engine = %entry.name, error = %e, "job start failed; record rolled back");
            return Err(e);
        }

        info!(job_id = %id, engine = %entry.name, job = %descr, report_period, "job started");

        let now = Instant::now();
        let mut guard = self.core.lock_main();
        let main = &mut *guard;
        if let Some(rec) = main.jobs.get_mut(id) {
            // The engine may already have reported a terminal state.
            if rec.state == JobState::Running && rec.reports_progress() {
                main.poll.schedule(id, PollMode::Progress, now + self.core.settings.units(report_period));
                rec.progress_scheduled = true;
            }
            if !entry.active && !rec.state.is_terminal() {
                main.poll
                    .schedule(id, PollMode::Status, now + self.core.settings.status_poll_interval());
            }
        }

        Ok(id)
    }

    /// Hand the job to its engine, retrying with exponential backoff while
    /// the engine reports itself busy.
    fn submit_to_engine(
        &self,
        job: &JobHandle,
        entry: &EngineEntry,
        params: Option<&(dyn std::any::Any + Send + Sync)>,
    ) -> Result<()> {
        let settings = &self.core.settings;
        let mut attempt = 0;
        loop {
            match entry.engine.start_job(job, params) {
                Ok(()) => return Ok(()),
                Err(EngineError::Busy) if attempt < settings.start_retry_limit => {
                    let backoff = settings.start_backoff(attempt);
                    debug!(engine = %entry.name, attempt, ?backoff, "engine busy; retrying start");
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(DispatchError::from_engine(
                        format!("cannot start the job {}", job.description()),
                        e,
                    ));
                }
            }
        }
    }

    /// Request cancellation. Repeated requests for the same id are ignored;
    /// cancelling a finished job is a no-op. Only running jobs are forwarded
    /// to their engine; a suspended job is rejected but stays marked.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let (job, engine, engine_name) = {
            let main = self.core.lock_main();

            if !main.jobs.is_allocated(id) {
                return Err(DispatchError::UnknownJob(id));
            }
            if !self.core.cancelled.mark(id) {
                info!(job_id = %id, "job cancel already requested; ignoring");
                return Ok(());
            }

            let rec = main.jobs.get(id).ok_or(DispatchError::UnknownJob(id))?;
            if rec.state.is_terminal() {
                debug!(job_id = %id, state = %rec.state, "cancel of a finished job ignored");
                return Ok(());
            }
            if rec.state != JobState::Running {
                return Err(DispatchError::InvalidOperation(format!(
                    "cannot cancel job {id}: job is {}",
                    rec.state
                )));
            }
            (Arc::clone(&rec.job), Arc::clone(&rec.engine), rec.engine_name.clone())
        };

        info!(job_id = %id, engine = %engine_name, "cancelling job");
        match engine.cancel_job(&job) {
            Ok(()) => Ok(()),
            Err(e) if e.is_benign_race() => {
                debug!(job_id = %id, error = %e, "job finished before the cancel reached the engine");
                Ok(())
            }
            Err(e) => Err(DispatchError::from_engine(
                format!("cannot cancel job {}", job.description()),
                e,
            )),
        }
    }

    /// Suspend a running job.
    pub fn suspend(&self, id: JobId) -> Result<()> {
        let (job, engine) = self.control_target(id, JobState::Running, "suspend")?;
        engine
            .suspend_job(&job)
            .map_err(|e| DispatchError::from_engine(format!("cannot suspend job {}", job.description()), e))?;
        self.core
            .submit_and_wait(EventTarget::Id(id), EventKind::Transition(JobState::Suspended), Origin::Dispatcher)
    }

    /// Resume a suspended job. Periodic progress picks up again.
    pub fn resume(&self, id: JobId) -> Result<()> {
        let (job, engine) = self.control_target(id, JobState::Suspended, "resume")?;
        engine
            .resume_job(&job)
            .map_err(|e| DispatchError::from_engine(format!("cannot resume job {}", job.description()), e))?;
        self.core
            .submit_and_wait(EventTarget::Id(id), EventKind::Transition(JobState::Running), Origin::Dispatcher)
    }

    /// Look up the job and engine for a suspend/resume, requiring `expected`.
    fn control_target(&self, id: JobId, expected: JobState, op: &str) -> Result<(JobHandle, EngineHandle)> {
        let main = self.core.lock_main();
        let rec = main.jobs.get(id).ok_or(DispatchError::UnknownJob(id))?;
        if rec.state != expected {
            return Err(DispatchError::InvalidOperation(format!(
                "cannot {op} job {id}: job is {}",
                rec.state
            )));
        }
        Ok((Arc::clone(&rec.job), Arc::clone(&rec.engine)))
    }

    /// Forget a job. A job that is still running is cancelled first.
    ///
    /// Returns `false` if no record exists.
    pub fn delete(&self, id: JobId) -> Result<bool> {
        let removed = {
            let mut main = self.core.lock_main();
            let Some(rec) = main.jobs.remove(id) else {
                return Ok(false);
            };
            self.core.cancelled.mark(id);
            rec
        };

        debug!(job_id = %id, state = %removed.state, "job record deleted");
        if removed.state.is_terminal() {
            return Ok(true);
        }

        match removed.engine.cancel_job(&removed.job) {
            Ok(()) => {}
            Err(e) if e.is_benign_race() => {
                debug!(job_id = %id, error = %e, "deleted job already stopped");
            }
            Err(e) => {
                return Err(DispatchError::from_engine(
                    format!("cannot cancel deleted job {}", removed.job.description()),
                    e,
                ));
            }
        }
        Ok(true)
    }

    pub fn state(&self, id: JobId) -> Result<JobState> {
        self.core
            .lock_main()
            .jobs
            .get(id)
            .map(|rec| rec.state)
            .ok_or(DispatchError::UnknownJob(id))
    }

    /// Latest progress. Jobs reporting periodically answer from the cached
    /// snapshot; others are asked directly.
    pub fn progress(&self, id: JobId) -> Result<Option<JobProgress>> {
        let job = {
            let main = self.core.lock_main();
            let rec = main.jobs.get(id).ok_or(DispatchError::UnknownJob(id))?;
            if rec.reports_progress() {
                return Ok(rec.progress.clone());
            }
            Arc::clone(&rec.job)
        };
        Ok(job.progress())
    }

    pub fn result(&self, id: JobId) -> Result<Option<JobOutput>> {
        Ok(self.job(id)?.result())
    }

    /// Error of a job. A failed job that did not report one gets a generic
    /// diagnostic.
    pub fn error(&self, id: JobId) -> Result<Option<JobError>> {
        let (job, state) = {
            let main = self.core.lock_main();
            let rec = main.jobs.get(id).ok_or(DispatchError::UnknownJob(id))?;
            (Arc::clone(&rec.job), rec.state)
        };

        Ok(match job.error() {
            Some(err) => Some(err),
            None if state == JobState::Failed => Some(JobError::unspecified()),
            None => None,
        })
    }

    pub fn description(&self, id: JobId) -> Result<String> {
        Ok(self.job(id)?.description())
    }

    fn job(&self, id: JobId) -> Result<JobHandle> {
        self.core
            .lock_main()
            .jobs
            .get(id)
            .map(|rec| Arc::clone(&rec.job))
            .ok_or(DispatchError::UnknownJob(id))
    }

    /// Whether cancellation was requested for `id`, through `cancel` or
    /// `delete`. Stays true after the record is gone.
    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.core.cancelled.contains(id)
    }

    /// Ids of all live records, ascending.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.core.lock_main().jobs.ids()
    }

    /// Broadcast a cancel request to every engine. Per-job cancel state is
    /// not touched.
    pub fn cancel_all_jobs(&self) {
        info!("requesting cancellation of all jobs");
        self.core.engines.request_cancel_all();
    }

    /// While muted, state changes and progress are still applied but
    /// listeners are not called.
    pub fn set_muted(&self, muted: bool) {
        self.core.muted.store(muted, Ordering::Release);
    }

    /// Process at most one due poll item. Returns `true` if one was taken.
    pub fn poll_once(&self) -> bool {
        self.core.poll_once()
    }

    /// When the next poll item becomes due, if any.
    pub fn next_poll_due(&self) -> Option<Instant> {
        self.core.lock_main().poll.next_due()
    }

    /// Run `job` on the calling thread, outside any engine, and report its
    /// final state to `listener` once.
    ///
    /// The job gets an id but no record; it is not visible to queries.
    pub fn run_sync(&self, job: &JobHandle, listener: &dyn JobListener) -> (JobId, JobState) {
        let id = self.core.lock_main().jobs.allocate_id();
        debug!(job_id = %id, job = %job.description(), "running job synchronously");

        let state = match job.run() {
            s @ (JobState::Completed | JobState::Canceled) => s,
            other => {
                if job.error().is_none() {
                    warn!(
                        job_id = %id,
                        returned = %other,
                        "synchronous job failed without reporting an error"
                    );
                }
                JobState::Failed
            }
        };

        listener.on_job_state_changed(id, state);
        (id, state)
    }

    /// Stop everything: cancel running jobs, drop all records and pending
    /// notifications, and shut down every engine. Idempotent.
    pub fn shutdown(&self) {
        if self.core.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("dispatcher shutting down");

        let records = {
            let mut main = self.core.lock_main();
            main.poll.clear();
            main.jobs.drain()
        };

        for rec in records.iter().filter(|rec| rec.state == JobState::Running) {
            match rec.engine.cancel_job(&rec.job) {
                Ok(()) => debug!(job_id = %rec.id, engine = %rec.engine_name, "job cancelled on shutdown"),
                Err(e) if e.is_benign_race() => {
                    debug!(job_id = %rec.id, error = %e, "job already stopped on shutdown");
                }
                Err(e) => {
                    error!(job_id = %rec.id, engine = %rec.engine_name, error = %e, "cannot cancel job on shutdown");
                }
            }
        }

        let dropped = self.core.pre_queue.clear();
        if dropped > 0 {
            debug!(dropped, "pending notifications discarded");
        }

        for entry in self.core.engines.drain() {
            if let Err(e) = entry.engine.shut_down() {
                error!(engine = %entry.name, error = %e, "engine shutdown failed");
            }
        }
        info!(jobs = records.len(), "dispatcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.is_shutting_down()
    }
}

fn shutting_down() -> DispatchError {
    DispatchError::InvalidOperation("dispatcher is shutting down".to_string())
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engines", &self.core.engines.names())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
