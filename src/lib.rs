// src/lib.rs

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod exec;
pub mod job;
pub mod listener;
pub mod logging;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, JobConfig, load_and_validate};
use crate::dispatch::{Dispatcher, StartOptions, spawn_poll_driver};
use crate::exec::{EngineHandle, SimulatedJob, ThreadEngine};
use crate::job::JobHandle;
use crate::listener::{ChannelListener, JobNotification, ListenerHandle};
use crate::types::JobId;

pub use crate::errors::{DispatchError, EngineError};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - one `ThreadEngine` per `[engine.<name>]`
/// - the poll driver
/// - one simulated job per `[job.<name>]`
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("cannot load {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let dispatcher = Dispatcher::new(cfg.dispatcher.clone());
    for (name, engine_cfg) in &cfg.engine {
        let engine: EngineHandle = Arc::new(ThreadEngine::new(
            name.clone(),
            engine_cfg.workers,
            engine_cfg.mode,
            Handle::current(),
        ));
        dispatcher.register_engine(name, engine);
    }

    let driver = spawn_poll_driver(dispatcher.clone());
    let (listener, mut notifications) = ChannelListener::channel();

    let mut names: BTreeMap<JobId, String> = BTreeMap::new();
    for (name, job_cfg) in &cfg.job {
        let listener: ListenerHandle = listener.clone();
        match start_job(&dispatcher, name, job_cfg, listener).await {
            Ok(id) => {
                names.insert(id, name.clone());
            }
            Err(e) => error!(job = %name, error = %format!("{e:#}"), "job not started"),
        }
    }
    drop(listener);

    // Ctrl-C → cancel everything; the loop below ends once the jobs stop.
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("interrupt received; cancelling all jobs");
            dispatcher.cancel_all_jobs();
        });
    }

    let mut remaining = names.len();
    while remaining > 0 {
        let Some(notification) = notifications.recv().await else {
            warn!("notification channel closed with jobs still running");
            break;
        };
        let name = names
            .get(&notification.id())
            .map(String::as_str)
            .unwrap_or("?");

        match notification {
            JobNotification::StateChanged { id, state } => {
                println!("[{id:>3}] {name:<20} {state}");
                if state.is_terminal() {
                    remaining -= 1;
                }
            }
            JobNotification::Progress { id, progress } => {
                println!(
                    "[{id:>3}] {name:<20} {:>5.1}% {}",
                    progress.done * 100.0,
                    progress.text
                );
            }
        }
    }

    print_summary(&dispatcher, &names);

    driver.stop().await;
    let d = dispatcher.clone();
    tokio::task::spawn_blocking(move || d.shutdown()).await?;
    debug!("host finished");
    Ok(())
}

/// `Dispatcher::start` may back off on a busy engine, so it runs on the
/// blocking pool.
async fn start_job(
    dispatcher: &Dispatcher,
    name: &str,
    cfg: &JobConfig,
    listener: ListenerHandle,
) -> Result<JobId> {
    let mut job = SimulatedJob::new(name, cfg.steps, Duration::from_millis(cfg.step_ms));
    if let Some(step) = cfg.fail_at_step {
        job = job.failing_at(step);
    }
    let job: JobHandle = Arc::new(job);

    let options = StartOptions::new()
        .listener(listener)
        .report_period(cfg.report_period)
        .auto_delete(cfg.auto_delete);

    let d = dispatcher.clone();
    let engine = cfg.engine.clone();
    let id = tokio::task::spawn_blocking(move || d.start(job, &engine, options)).await??;
    Ok(id)
}

fn print_summary(dispatcher: &Dispatcher, names: &BTreeMap<JobId, String>) {
    println!();
    println!("summary:");
    for (id, name) in names {
        let Ok(state) = dispatcher.state(*id) else {
            println!("  - {name}: record deleted");
            continue;
        };
        println!("  - {name}: {state}");

        if let Ok(Some(result)) = dispatcher.result(*id) {
            if let Some(text) = result.downcast_ref::<String>() {
                println!("      result: {text}");
            }
        }
        if let Ok(Some(err)) = dispatcher.error(*id) {
            println!("      error: {err}");
        }
    }
}

/// Simple dry-run output: print settings, engines and jobs.
fn print_dry_run(cfg: &ConfigFile) {
    let d = &cfg.dispatcher;
    println!("jobdispatch dry-run");
    println!("  dispatcher.time_unit_ms = {}", d.time_unit_ms);
    println!("  dispatcher.min_report_period = {}", d.min_report_period);
    println!("  dispatcher.status_poll_period = {}", d.status_poll_period);
    println!(
        "  dispatcher.start_retry = {} x {}ms",
        d.start_retry_limit, d.start_retry_backoff_ms
    );
    println!();

    println!("engines ({}):", cfg.engine.len());
    for (name, engine) in &cfg.engine {
        println!("  - {name}: {:?}, {} workers", engine.mode, engine.workers);
    }
    println!();

    println!("jobs ({}):", cfg.job.len());
    for (name, job) in &cfg.job {
        println!("  - {name}");
        println!("      engine: {}", job.engine);
        println!("      steps: {} x {}ms", job.steps, job.step_ms);
        if let Some(step) = job.fail_at_step {
            println!("      fail_at_step: {step}");
        }
        if job.report_period > 0 {
            println!("      report_period: {}", job.report_period);
        }
        if job.auto_delete {
            println!("      auto_delete: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
