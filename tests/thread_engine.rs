// tests/thread_engine.rs

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Duration, sleep};

use jobdispatch::dispatch::{Dispatcher, StartOptions, spawn_poll_driver};
use jobdispatch::errors::DispatchError;
use jobdispatch::exec::{SimulatedJob, ThreadEngine};
use jobdispatch::job::JobHandle;
use jobdispatch::listener::{ChannelListener, JobNotification};
use jobdispatch::types::{JobId, JobState};
use jobdispatch_test_utils::builders::fast_settings;
use jobdispatch_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn dispatcher_with(engine: ThreadEngine) -> Dispatcher {
    init_tracing();
    let d = Dispatcher::new(fast_settings());
    assert!(d.register_engine("local", Arc::new(engine)));
    d
}

/// Wait for the next state notification of `id`, skipping progress.
async fn next_state(rx: &mut UnboundedReceiver<JobNotification>, id: JobId) -> JobState {
    with_timeout(async {
        loop {
            match rx.recv().await {
                Some(JobNotification::StateChanged { id: got, state }) if got == id => {
                    return state;
                }
                Some(_) => continue,
                None => panic!("notification channel closed"),
            }
        }
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn active_engine_reports_completion() -> TestResult {
    let d = dispatcher_with(ThreadEngine::active("local", 2));
    let (listener, mut rx) = ChannelListener::channel();

    let job: JobHandle = Arc::new(SimulatedJob::new("sim", 3, Duration::from_millis(5)));
    let id = d.start(job, "local", StartOptions::new().listener(listener))?;

    assert_eq!(next_state(&mut rx, id).await, JobState::Completed);
    assert_eq!(d.state(id)?, JobState::Completed);

    let result = d.result(id)?.expect("simulated job stores a result");
    assert_eq!(
        result.downcast_ref::<String>().map(String::as_str),
        Some("sim: 3 steps done")
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_job_carries_its_error() -> TestResult {
    let d = dispatcher_with(ThreadEngine::active("local", 2));
    let (listener, mut rx) = ChannelListener::channel();

    let job: JobHandle =
        Arc::new(SimulatedJob::new("flaky", 5, Duration::from_millis(2)).failing_at(1));
    let id = d.start(job, "local", StartOptions::new().listener(listener))?;

    assert_eq!(next_state(&mut rx, id).await, JobState::Failed);
    let err = d.error(id)?.expect("failed job has an error");
    assert!(err.message.contains("failed at step 1"), "{err}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_is_forwarded_into_the_job() -> TestResult {
    let d = dispatcher_with(ThreadEngine::active("local", 1));
    let (listener, mut rx) = ChannelListener::channel();

    let sim = Arc::new(SimulatedJob::new("endless", 10_000, Duration::from_millis(2)));
    let job: JobHandle = sim.clone();
    let id = d.start(job, "local", StartOptions::new().listener(listener))?;

    sleep(Duration::from_millis(20)).await;
    d.cancel(id)?;

    assert_eq!(next_state(&mut rx, id).await, JobState::Canceled);
    assert!(sim.steps_done() < 10_000);
    assert!(d.is_cancel_requested(id));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_engine_reports_busy_after_retries() -> TestResult {
    let d = dispatcher_with(ThreadEngine::active("local", 1));

    let first: JobHandle = Arc::new(SimulatedJob::new("hog", 10_000, Duration::from_millis(2)));
    let first_id = d.start(first, "local", StartOptions::new())?;

    let second: JobHandle = Arc::new(SimulatedJob::new("waiting", 1, Duration::from_millis(1)));
    let err = d.start(second, "local", StartOptions::new()).unwrap_err();
    assert!(matches!(err, DispatchError::EngineBusy), "{err}");
    assert_eq!(d.job_ids(), vec![first_id]);

    d.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passive_engine_is_driven_by_the_poll_driver() -> TestResult {
    let d = dispatcher_with(ThreadEngine::passive("local", 2));
    let driver = spawn_poll_driver(d.clone());
    let (listener, mut rx) = ChannelListener::channel();

    let job: JobHandle = Arc::new(SimulatedJob::new("background", 2, Duration::from_millis(5)));
    let id = d.start(
        job,
        "local",
        StartOptions::new().listener(listener).report_period(3),
    )?;

    assert_eq!(next_state(&mut rx, id).await, JobState::Completed);

    // Passive records are collected right after the final poll.
    with_timeout(async {
        while d.state(id).is_ok() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    driver.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_ends_after_shutdown() -> TestResult {
    let d = dispatcher_with(ThreadEngine::active("local", 1));
    let driver = spawn_poll_driver(d.clone());

    d.shutdown();
    with_timeout(async {
        while !driver.is_finished() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    driver.stop().await;
    Ok(())
}
