// src/dispatch/poll_queue.rs

//! Time-ordered queue driving periodic progress pulls and passive-engine
//! status polls, plus the idle tick that consumes it.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::dispatch::dispatcher::DispatcherCore;
use crate::dispatch::pipeline::{EventKind, EventTarget, Origin};
use crate::exec::EngineHandle;
use crate::job::JobHandle;
use crate::types::{JobId, JobState};

/// What a queue item does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Pull a progress snapshot from a running job.
    Progress,
    /// Ask a passive engine for the job's state.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollItem {
    pub job_id: JobId,
    pub mode: PollMode,
    pub due_at: Instant,
}

/// Items ordered by due time; ties keep insertion order.
#[derive(Debug, Default)]
pub struct PollQueue {
    items: BTreeMap<(Instant, u64), PollItem>,
    seq: u64,
}

impl PollQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, job_id: JobId, mode: PollMode, due_at: Instant) {
        self.seq += 1;
        self.items.insert(
            (due_at, self.seq),
            PollItem {
                job_id,
                mode,
                due_at,
            },
        );
    }

    /// Remove and return the earliest item if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<PollItem> {
        let entry = self.items.first_entry()?;
        if entry.get().due_at <= now {
            Some(entry.remove())
        } else {
            None
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.items.first_key_value().map(|(_, item)| item.due_at)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Work picked from the queue under the main lock and executed after it has
/// been released.
enum PollWork {
    Progress {
        id: JobId,
        job: JobHandle,
    },
    Status {
        id: JobId,
        job: JobHandle,
        engine: EngineHandle,
        engine_name: String,
        known: JobState,
    },
}

impl DispatcherCore {
    /// Process at most one due poll item. Returns `true` if an item was
    /// taken off the queue.
    pub(crate) fn poll_once(&self) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        let now = Instant::now();
        let work = {
            let mut guard = self.lock_main();
            let main = &mut *guard;
            let Some(item) = main.poll.pop_due(now) else {
                return false;
            };

            let Some(rec) = main.jobs.get_mut(item.job_id) else {
                trace!(job_id = %item.job_id, "poll item for a removed record; dropping");
                return true;
            };

            match item.mode {
                PollMode::Progress => {
                    if rec.state != JobState::Running {
                        trace!(job_id = %rec.id, state = %rec.state, "job no longer running; progress polling stops");
                        rec.progress_scheduled = false;
                        return true;
                    }
                    let work = PollWork::Progress {
                        id: rec.id,
                        job: rec.job.clone(),
                    };
                    let due = now + self.settings.units(rec.report_period);
                    main.poll.schedule(item.job_id, PollMode::Progress, due);
                    work
                }
                PollMode::Status => PollWork::Status {
                    id: rec.id,
                    job: rec.job.clone(),
                    engine: rec.engine.clone(),
                    engine_name: rec.engine_name.clone(),
                    known: rec.state,
                },
            }
        };

        match work {
            PollWork::Progress { id, job } => self.pull_progress(id, &job),
            PollWork::Status {
                id,
                job,
                engine,
                engine_name,
                known,
            } => self.poll_status(id, &job, &engine, &engine_name, known),
        }

        true
    }

    fn pull_progress(&self, id: JobId, job: &JobHandle) {
        let Some(progress) = job.progress() else {
            warn!(
                job_id = %id,
                job = %job.description(),
                "periodic progress requested but the job reports none"
            );
            return;
        };

        if let Err(e) = self.submit_and_wait(EventTarget::Id(id), EventKind::Progress(progress), Origin::Poll) {
            debug!(job_id = %id, error = %e, "progress notification not delivered");
        }
    }

    fn poll_status(
        &self,
        id: JobId,
        job: &JobHandle,
        engine: &EngineHandle,
        engine_name: &str,
        known: JobState,
    ) {
        match engine.job_state(job) {
            Ok(state) if state != known => {
                debug!(job_id = %id, engine = %engine_name, from = %known, to = %state, "passive engine reported a new state");
                match self.submit_and_wait(EventTarget::Id(id), EventKind::Transition(state), Origin::Poll) {
                    Ok(()) => {}
                    // Still queued; the flush that applies it collects a
                    // terminal record.
                    Err(e) if e.is_transient() => {
                        debug!(job_id = %id, engine = %engine_name, "status transition left queued; polling continues");
                    }
                    Err(e) => {
                        error!(job_id = %id, engine = %engine_name, error = %e, "status poll transition failed");
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                // Not rescheduled: a broken engine must not keep the queue busy.
                error!(job_id = %id, engine = %engine_name, error = %e, "status poll failed; polling stops for this job");
                return;
            }
        }

        // Terminal records are collected by the flush right after their
        // listener was notified.
        let mut guard = self.lock_main();
        let main = &mut *guard;
        if main.jobs.get(id).is_some_and(|rec| !rec.state.is_terminal()) {
            let due = Instant::now() + self.settings.status_poll_interval();
            main.poll.schedule(id, PollMode::Status, due);
        }
    }
}
