// src/dispatch/pipeline.rs

//! Notification pipeline.
//!
//! Two stages:
//!
//! 1. A pre-queue with its own lock. Every state change (from engines, from
//!    suspend/resume, from passive polls) and every progress snapshot is
//!    appended here in arrival order. The lock is held only to push or pop a
//!    single event.
//! 2. A flush step. Whoever wins the flush lock drains the pre-queue one
//!    event at a time: the event is validated and applied to its record under
//!    the main lock, the main lock is released, then the listener is called.
//!    Records that must go away on a terminal state (auto-delete, passive
//!    engines) are removed only after the listener has returned.
//!    Only one thread flushes at a time, so listeners observe transitions in
//!    exactly the order they were validated, and since no dispatcher lock
//!    other than the flush lock is held during the callback, listeners may
//!    call back into the dispatcher.
//!
//! Producers never block on the flush lock. They retry a non-blocking lock
//! attempt with a short backoff until their own event has been processed,
//! and give up with `EngineBusy` after `flush_spin_limit` attempts. A given
//! up event is not lost: the thread currently flushing re-checks the queue
//! after releasing the flush lock.

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, trace, warn};

use crate::dispatch::dispatcher::DispatcherCore;
use crate::dispatch::poll_queue::PollMode;
use crate::dispatch::state::check_transition;
use crate::errors::{DispatchError, Result};
use crate::job::{JobHandle, JobKey};
use crate::listener::ListenerHandle;
use crate::types::{JobId, JobProgress, JobState};

/// Spin attempts made without sleeping before backing off.
const SPIN_WITHOUT_SLEEP: u32 = 5;

/// How a pipeline event finds its record.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EventTarget {
    /// Engine callbacks only know the job instance.
    Instance(JobKey),
    Id(JobId),
}

#[derive(Debug, Clone)]
pub(crate) enum EventKind {
    Transition(JobState),
    Progress(JobProgress),
}

/// Which side produced the event; used for logging and for deciding how a
/// vanished record is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Engine,
    Dispatcher,
    Poll,
}

pub(crate) struct PipelineEvent {
    target: EventTarget,
    kind: EventKind,
    origin: Origin,
    reply: oneshot::Sender<Result<()>>,
}

/// Stage 1: raw events in arrival order.
#[derive(Default)]
pub(crate) struct PreQueue {
    events: Mutex<VecDeque<PipelineEvent>>,
}

impl PreQueue {
    fn push(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn pop(&self) -> Option<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn is_empty(&self) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Drop every queued event. Waiting producers see their reply channel
    /// disconnect.
    pub(crate) fn clear(&self) -> usize {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let n = events.len();
        events.clear();
        n
    }
}

/// Outcome of applying one event to its record.
#[derive(Default)]
struct Applied {
    delivery: Option<Delivery>,
    /// Record to drop once the listener has seen the terminal state.
    collect: Option<JobId>,
}

/// A validated notification waiting to be handed to a listener.
enum Delivery {
    State {
        listener: ListenerHandle,
        id: JobId,
        state: JobState,
    },
    Progress {
        listener: ListenerHandle,
        id: JobId,
        progress: JobProgress,
    },
}

thread_local! {
    /// Address of the dispatcher this thread is currently flushing, or 0.
    static FLUSHING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as the flusher of a dispatcher for its lifetime.
struct FlushMarker {
    previous: usize,
}

impl FlushMarker {
    fn enter(core: &DispatcherCore) -> Self {
        let previous = FLUSHING.with(|f| f.replace(core.address()));
        Self { previous }
    }
}

impl Drop for FlushMarker {
    fn drop(&mut self) {
        FLUSHING.with(|f| f.set(self.previous));
    }
}

impl DispatcherCore {
    fn address(&self) -> usize {
        self as *const DispatcherCore as usize
    }

    fn is_flushing_here(&self) -> bool {
        FLUSHING.with(|f| f.get() == self.address())
    }

    /// Entry point for active engines.
    pub(crate) fn on_engine_job_state_changed(
        &self,
        engine: &str,
        job: &JobHandle,
        state: JobState,
    ) -> Result<()> {
        if self.is_shutting_down() {
            return Ok(());
        }

        // Job start is already observable through `start`; keep the
        // pipeline for transitions away from Running/Suspended.
        if state == JobState::Running {
            trace!(engine = %engine, job = %job.description(), "running notification filtered");
            return Ok(());
        }

        self.submit_and_wait(
            EventTarget::Instance(JobKey::of(job)),
            EventKind::Transition(state),
            Origin::Engine,
        )
    }

    /// Queue an event and flush until it has been processed.
    ///
    /// Returns the validation outcome of the event. When called from inside a
    /// listener callback on the flushing thread the event is queued behind
    /// the current notification and `Ok` is returned immediately.
    pub(crate) fn submit_and_wait(
        &self,
        target: EventTarget,
        kind: EventKind,
        origin: Origin,
    ) -> Result<()> {
        let (reply, mut outcome) = oneshot::channel();
        self.pre_queue.push(PipelineEvent {
            target,
            kind,
            origin,
            reply,
        });

        if self.is_flushing_here() {
            trace!(?origin, "re-entrant notification queued behind the current delivery");
            return Ok(());
        }

        let limit = self.settings.flush_spin_limit.max(1);
        for attempt in 0..limit {
            self.try_flush();

            match outcome.try_recv() {
                Ok(result) => return result,
                // Discarded by shutdown.
                Err(TryRecvError::Closed) => return Ok(()),
                Err(TryRecvError::Empty) => {}
            }

            if attempt > SPIN_WITHOUT_SLEEP {
                std::thread::sleep(Duration::from_millis(5 + u64::from(attempt)));
            } else {
                std::thread::yield_now();
            }
        }

        warn!(?origin, attempts = limit, "notification flush takes too long; event left queued");
        Err(DispatchError::EngineBusy)
    }

    /// Drain the pre-queue if no other thread is doing so. Returns `false` if
    /// another thread holds the flush lock.
    pub(crate) fn try_flush(&self) -> bool {
        loop {
            let guard = match self.flush_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => return false,
            };

            {
                let _marker = FlushMarker::enter(self);
                while let Some(event) = self.pre_queue.pop() {
                    self.process_event(event);
                }
            }
            drop(guard);

            // A producer may have pushed after our last pop and failed its
            // lock attempt while we still held the flush lock.
            if self.pre_queue.is_empty() {
                return true;
            }
        }
    }

    fn process_event(&self, event: PipelineEvent) {
        let PipelineEvent {
            target,
            kind,
            origin,
            reply,
        } = event;

        let outcome = self.apply_event(target, kind, origin).map(|applied| {
            if let Some(delivery) = applied.delivery {
                self.deliver(delivery);
            }
            if let Some(id) = applied.collect {
                self.collect_finished(id);
            }
        });

        // The producer may have given up waiting.
        let _ = reply.send(outcome);
    }

    /// Validate and apply one event under the main lock.
    fn apply_event(
        &self,
        target: EventTarget,
        kind: EventKind,
        origin: Origin,
    ) -> Result<Applied> {
        let mut guard = self.lock_main();
        let main = &mut *guard;

        let id = match target {
            EventTarget::Id(id) => Some(id),
            EventTarget::Instance(key) => main.jobs.id_of(key),
        };

        let Some(rec) = id.and_then(|id| main.jobs.get_mut(id)) else {
            return match (origin, id) {
                (Origin::Dispatcher, Some(id)) => Err(DispatchError::UnknownJob(id)),
                _ => {
                    debug!(?origin, ?kind, "notification for a job without record; ignored");
                    Ok(Applied::default())
                }
            };
        };

        let listener = if self.is_muted() {
            None
        } else {
            rec.listener.clone()
        };

        match kind {
            EventKind::Transition(to) => {
                if let Err(e) = check_transition(&rec.job.description(), rec.state, to) {
                    error!(
                        job_id = %rec.id,
                        engine = %rec.engine_name,
                        ?origin,
                        error = %e,
                        "rejected job state transition"
                    );
                    return Err(e);
                }

                debug!(job_id = %rec.id, from = %rec.state, %to, ?origin, "job state changed");
                rec.state = to;
                let id = rec.id;

                if to == JobState::Running && rec.reports_progress() && !rec.progress_scheduled {
                    let due = Instant::now() + self.settings.units(rec.report_period);
                    main.poll.schedule(id, PollMode::Progress, due);
                    rec.progress_scheduled = true;
                }

                let collect = (to.is_terminal() && (rec.auto_delete || rec.passive_engine)).then_some(id);

                if listener.is_none() {
                    debug!(job_id = %id, "job notification not delivered (muted or no listener)");
                }
                Ok(Applied {
                    delivery: listener.map(|listener| Delivery::State {
                        listener,
                        id,
                        state: to,
                    }),
                    collect,
                })
            }
            EventKind::Progress(progress) => {
                if rec.state != JobState::Running {
                    trace!(job_id = %rec.id, state = %rec.state, "progress for a job that is not running; dropped");
                    return Ok(Applied::default());
                }
                rec.progress = Some(progress.clone());
                Ok(Applied {
                    delivery: listener.map(|listener| Delivery::Progress {
                        listener,
                        id: rec.id,
                        progress,
                    }),
                    collect: None,
                })
            }
        }
    }

    /// Drop a finished record after its terminal notification went out.
    /// The record may already be gone through `delete` or `shutdown`.
    fn collect_finished(&self, id: JobId) {
        let mut main = self.lock_main();
        match main.jobs.get(id) {
            Some(rec) if rec.state.is_terminal() => {
                let auto = rec.auto_delete;
                main.jobs.remove(id);
                if auto {
                    debug!(job_id = %id, "terminal state reached; record auto-deleted");
                } else {
                    debug!(job_id = %id, "passive job finished; record removed");
                }
            }
            _ => {}
        }
    }

    /// Call the listener. Runs without the main lock; panics are contained.
    fn deliver(&self, delivery: Delivery) {
        let (id, outcome) = match &delivery {
            Delivery::State {
                listener,
                id,
                state,
            } => (
                *id,
                panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.on_job_state_changed(*id, *state)
                })),
            ),
            Delivery::Progress {
                listener,
                id,
                progress,
            } => (
                *id,
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_job_progress(*id, progress))),
            ),
        };

        if let Err(payload) = outcome {
            error!(
                job_id = %id,
                panic = %panic_message(payload.as_ref()),
                "listener panicked while handling a job notification"
            );
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
