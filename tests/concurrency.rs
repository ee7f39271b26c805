// tests/concurrency.rs

use std::error::Error;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use jobdispatch::dispatch::{Dispatcher, StartOptions, is_valid_transition};
use jobdispatch::errors::DispatchError;
use jobdispatch::job::JobHandle;
use jobdispatch::types::{JobId, JobState};
use jobdispatch_test_utils::builders::fast_settings;
use jobdispatch_test_utils::init_tracing;
use jobdispatch_test_utils::jobs::StaticJob;
use jobdispatch_test_utils::listeners::RecordingListener;
use jobdispatch_test_utils::scripted_engine::ScriptedEngine;

type TestResult = Result<(), Box<dyn Error>>;

fn setup() -> (Dispatcher, Arc<ScriptedEngine>) {
    init_tracing();
    let d = Dispatcher::new(fast_settings());
    let engine = ScriptedEngine::active();
    assert!(d.register_engine("scripted", engine.clone()));
    (d, engine)
}

/// Every observed sequence must start from `Running` and only take legal
/// steps, with at most one terminal state at the end.
fn assert_legal_sequence(id: JobId, states: &[JobState]) {
    let mut current = JobState::Running;
    for (i, &next) in states.iter().enumerate() {
        assert!(
            is_valid_transition(current, next),
            "job {id}: illegal step {current} -> {next} at {i} in {states:?}"
        );
        current = next;
    }
}

#[test]
fn cancel_racing_completion_yields_one_terminal_notification() -> TestResult {
    let (d, engine) = setup();
    let listener = RecordingListener::new();

    for round in 0..50 {
        let job = StaticJob::new(&format!("race-{round}")).handle();
        let id = d.start(
            Arc::clone(&job),
            "scripted",
            StartOptions::new().listener(listener.clone()),
        )?;

        let barrier = Arc::new(Barrier::new(2));
        let canceller = {
            let d = d.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                d.cancel(id)
            })
        };
        let finisher = {
            let engine = Arc::clone(&engine);
            let job = Arc::clone(&job);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.complete(&job, JobState::Completed)
            })
        };

        canceller.join().expect("canceller panicked")?;
        finisher.join().expect("finisher panicked")?;

        assert_eq!(listener.states_for(id), vec![JobState::Completed]);
        assert!(d.is_cancel_requested(id));
    }
    Ok(())
}

#[test]
fn many_threads_keep_per_job_notification_order() -> TestResult {
    let (d, engine) = setup();
    let listener = RecordingListener::new();
    let threads = 8;
    let jobs_per_thread = 25;

    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let d = d.clone();
            let engine = Arc::clone(&engine);
            let listener = listener.clone();
            thread::spawn(move || -> Result<Vec<JobId>, DispatchError> {
                let mut ids = Vec::new();
                for n in 0..jobs_per_thread {
                    let job: JobHandle = StaticJob::new(&format!("t{t}-j{n}")).handle();
                    let id = d.start(
                        Arc::clone(&job),
                        "scripted",
                        StartOptions::new().listener(listener.clone()),
                    )?;
                    if n % 3 == 0 {
                        d.suspend(id)?;
                        d.resume(id)?;
                    }
                    let end = if n % 2 == 0 { JobState::Completed } else { JobState::Failed };
                    match engine.complete(&job, end) {
                        Ok(()) | Err(DispatchError::EngineBusy) => {}
                        Err(e) => return Err(e),
                    }
                    ids.push(id);
                }
                Ok(ids)
            })
        })
        .collect();

    let mut all = Vec::new();
    for w in workers {
        all.extend(w.join().expect("worker panicked")?);
    }
    assert_eq!(all.len(), threads * jobs_per_thread);

    for id in all {
        let states = listener.states_for(id);
        assert_legal_sequence(id, &states);
        assert_eq!(
            states.iter().filter(|s| s.is_terminal()).count(),
            1,
            "job {id}: {states:?}"
        );
    }
    Ok(())
}

#[test]
fn slow_listener_does_not_lose_notifications() -> TestResult {
    init_tracing();
    let d = Dispatcher::new(fast_settings());
    let engine = ScriptedEngine::active();
    assert!(d.register_engine("scripted", engine.clone()));

    let listener = RecordingListener::with_hook(|_, _| thread::sleep(Duration::from_millis(3)));
    let jobs: Vec<(JobId, JobHandle)> = (0..16)
        .map(|n| -> Result<(JobId, JobHandle), DispatchError> {
            let job = StaticJob::new(&format!("slow-{n}")).handle();
            let id = d.start(
                Arc::clone(&job),
                "scripted",
                StartOptions::new().listener(listener.clone()),
            )?;
            Ok((id, job))
        })
        .collect::<Result<_, DispatchError>>()?;

    let handles: Vec<_> = jobs
        .iter()
        .map(|(_, job)| {
            let engine = Arc::clone(&engine);
            let job = Arc::clone(job);
            thread::spawn(move || engine.complete(&job, JobState::Completed))
        })
        .collect();
    for h in handles {
        // Busy means the event stayed queued; it is delivered by whoever
        // flushes next.
        match h.join().expect("notifier panicked") {
            Ok(()) | Err(DispatchError::EngineBusy) => {}
            Err(e) => return Err(e.into()),
        }
    }

    for (id, _) in &jobs {
        assert!(
            listener.wait_for_state(*id, JobState::Completed, Duration::from_secs(3)),
            "job {id} never reported"
        );
        assert_eq!(listener.states_for(*id), vec![JobState::Completed]);
    }
    Ok(())
}
