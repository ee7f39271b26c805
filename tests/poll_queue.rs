// tests/poll_queue.rs

use std::error::Error;
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use jobdispatch::dispatch::{Dispatcher, StartOptions};
use jobdispatch::errors::DispatchError;
use jobdispatch::job::JobHandle;
use jobdispatch::types::JobState;
use jobdispatch_test_utils::builders::fast_settings;
use jobdispatch_test_utils::jobs::StaticJob;
use jobdispatch_test_utils::listeners::RecordingListener;
use jobdispatch_test_utils::scripted_engine::{EngineCall, ScriptedEngine};
use jobdispatch_test_utils::{init_tracing, wait_until};

type TestResult = Result<(), Box<dyn Error>>;

const LIMIT: Duration = Duration::from_secs(3);

fn dispatcher_with(engine: Arc<ScriptedEngine>) -> Dispatcher {
    init_tracing();
    let d = Dispatcher::new(fast_settings());
    assert!(d.register_engine("scripted", engine));
    d
}

/// Drive the poll queue from the test thread until `cond` holds.
fn poll_until(d: &Dispatcher, mut cond: impl FnMut() -> bool) -> bool {
    wait_until(LIMIT, || {
        while d.poll_once() {}
        cond()
    })
}

#[test]
fn progress_is_pulled_on_the_report_period() -> TestResult {
    let engine = ScriptedEngine::active();
    let d = dispatcher_with(engine);
    let listener = RecordingListener::new();

    let job = Arc::new(StaticJob::new("reporter").with_progress(0.1, "starting"));
    let handle: JobHandle = job.clone();
    let started = Instant::now();
    // Raised to the 3-unit minimum: 30ms with the fast settings.
    let id = d.start(
        handle,
        "scripted",
        StartOptions::new().listener(listener.clone()).report_period(1),
    )?;

    assert!(!d.poll_once(), "first pull is one period away");
    let due = d.next_poll_due().expect("progress item scheduled");
    assert!(due >= started + Duration::from_millis(30));

    assert!(poll_until(&d, || listener.progress_for(id).len() >= 1));
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(d.progress(id)?.map(|p| p.text), Some("starting".to_string()));

    job.set_progress(0.6, "most of it");
    assert!(poll_until(&d, || {
        listener
            .progress_for(id)
            .iter()
            .any(|p| p.text == "most of it")
    }));
    assert_eq!(d.progress(id)?.map(|p| p.done), Some(0.6));
    Ok(())
}

#[test]
fn progress_stops_while_suspended_and_resumes_after() -> TestResult {
    let engine = ScriptedEngine::active();
    let d = dispatcher_with(engine.clone());
    let listener = RecordingListener::new();

    let handle: JobHandle = Arc::new(StaticJob::new("pausable").with_progress(0.3, "working"));
    let id = d.start(
        Arc::clone(&handle),
        "scripted",
        StartOptions::new().listener(listener.clone()).report_period(3),
    )?;
    assert!(poll_until(&d, || !listener.progress_for(id).is_empty()));

    d.suspend(id)?;
    let before = listener.progress_for(id).len();
    std::thread::sleep(Duration::from_millis(100));
    while d.poll_once() {}
    assert_eq!(listener.progress_for(id).len(), before);
    assert!(d.next_poll_due().is_none(), "progress item dropped while suspended");

    d.resume(id)?;
    assert!(poll_until(&d, || listener.progress_for(id).len() > before));

    engine.complete(&handle, JobState::Completed)?;
    let after = listener.progress_for(id).len();
    std::thread::sleep(Duration::from_millis(100));
    while d.poll_once() {}
    assert_eq!(listener.progress_for(id).len(), after, "no progress after a terminal state");
    Ok(())
}

#[test]
fn jobs_without_report_period_are_never_polled() -> TestResult {
    let engine = ScriptedEngine::active();
    let d = dispatcher_with(engine);
    let listener = RecordingListener::new();

    let handle: JobHandle = Arc::new(StaticJob::new("quiet").with_progress(0.9, "almost"));
    d.start(handle, "scripted", StartOptions::new().listener(listener.clone()))?;

    assert!(d.next_poll_due().is_none());
    assert!(!d.poll_once());
    assert!(listener.events().is_empty());
    Ok(())
}

#[test]
fn passive_engine_is_reconciled_by_status_polls() -> TestResult {
    let engine = ScriptedEngine::passive();
    let d = dispatcher_with(engine.clone());
    assert!(!engine.is_attached(), "passive engines get no notifier");
    let listener = RecordingListener::new();

    let handle = StaticJob::new("polled").handle();
    let id = d.start(
        Arc::clone(&handle),
        "scripted",
        StartOptions::new().listener(listener.clone()),
    )?;

    // Unchanged state: polls keep going, nothing is delivered.
    assert!(poll_until(&d, || {
        engine.count(|c| matches!(c, EngineCall::JobState(_))) >= 2
    }));
    assert!(listener.events().is_empty());
    assert_eq!(d.state(id)?, JobState::Running);

    engine.set_state(&handle, JobState::Completed);
    assert!(poll_until(&d, || !listener.states_for(id).is_empty()));
    assert_eq!(listener.states_for(id), vec![JobState::Completed]);

    // The record is collected and polling stops.
    assert!(matches!(d.state(id), Err(DispatchError::UnknownJob(_))));
    assert!(d.next_poll_due().is_none());
    Ok(())
}

#[test]
fn passive_record_is_collected_after_a_busy_flush() -> TestResult {
    init_tracing();
    let mut settings = fast_settings();
    settings.flush_spin_limit = 3;
    let d = Dispatcher::new(settings);
    let active = ScriptedEngine::active();
    let passive = ScriptedEngine::passive();
    assert!(d.register_engine("active", active.clone()));
    assert!(d.register_engine("passive", passive.clone()));

    // Blocks inside its callback, and so holds the flush, until released.
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let gate = Mutex::new((entered_tx, release_rx));
    let slow = RecordingListener::with_hook(move |_, _| {
        let gate = gate.lock().unwrap();
        let _ = gate.0.send(());
        let _ = gate.1.recv_timeout(LIMIT);
    });

    let blocker = StaticJob::new("blocker").handle();
    d.start(Arc::clone(&blocker), "active", StartOptions::new().listener(slow))?;

    let listener = RecordingListener::new();
    let polled = StaticJob::new("polled").handle();
    let id = d.start(
        Arc::clone(&polled),
        "passive",
        StartOptions::new().listener(listener.clone()),
    )?;

    let flusher = {
        let active = Arc::clone(&active);
        let blocker = Arc::clone(&blocker);
        std::thread::spawn(move || active.complete(&blocker, JobState::Completed))
    };
    entered_rx.recv_timeout(LIMIT)?;

    passive.set_state(&polled, JobState::Completed);
    assert!(poll_until(&d, || {
        passive.count(|c| matches!(c, EngineCall::JobState(_))) >= 1
    }));
    // Queued behind the blocked delivery; polling goes on meanwhile.
    assert_eq!(d.state(id)?, JobState::Running);
    assert!(d.next_poll_due().is_some());

    release_tx.send(())?;
    flusher.join().expect("flusher panicked")?;

    assert_eq!(listener.states_for(id), vec![JobState::Completed]);
    assert!(matches!(d.state(id), Err(DispatchError::UnknownJob(_))));
    Ok(())
}

#[test]
fn progress_cadence_is_at_most_one_per_period() -> TestResult {
    let engine = ScriptedEngine::active();
    let d = dispatcher_with(engine);
    let listener = RecordingListener::new();

    let handle: JobHandle = Arc::new(StaticJob::new("steady").with_progress(0.5, "half"));
    // 5 units of 10ms.
    let id = d.start(
        handle,
        "scripted",
        StartOptions::new().listener(listener.clone()).report_period(5),
    )?;

    let window = Duration::from_millis(300);
    let started = Instant::now();
    while started.elapsed() < window {
        while d.poll_once() {}
        std::thread::sleep(Duration::from_millis(1));
    }

    let pulls = listener.progress_for(id).len();
    assert!(pulls >= 1, "no progress at all");
    assert!(pulls <= 300 / 50, "{pulls} pulls in {window:?}");
    Ok(())
}
