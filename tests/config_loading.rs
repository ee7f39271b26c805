// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use jobdispatch::config::model::{MAX_POLL_DELAY, MAX_TIME_UNIT_MS};
use jobdispatch::config::{load_and_validate, parse_str, validate_settings};
use jobdispatch::errors::DispatchError;
use jobdispatch::types::EngineMode;
use jobdispatch_test_utils::builders::{ConfigFileBuilder, JobConfigBuilder, fast_settings};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn full_config_round_trips_from_disk() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("Jobdispatch.toml");
    fs::write(
        &path,
        r#"
[dispatcher]
time_unit_ms = 50
min_report_period = 2

[engine.local]
workers = 3

[engine.batch]
mode = "passive"

[job.index]
engine = "local"
steps = 20
step_ms = 25
report_period = 4
auto_delete = true

[job.nightly]
engine = "batch"
fail_at_step = 7
"#,
    )?;

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.dispatcher.time_unit_ms, 50);
    assert_eq!(cfg.dispatcher.min_report_period, 2);
    // Untouched knobs keep their defaults.
    assert_eq!(cfg.dispatcher.status_poll_period, 15);
    assert_eq!(cfg.dispatcher.start_retry_limit, 5);
    assert_eq!(cfg.dispatcher.flush_spin_limit, 20);

    assert_eq!(cfg.engine["local"].workers, 3);
    assert_eq!(cfg.engine["local"].mode, EngineMode::Active);
    assert_eq!(cfg.engine["batch"].workers, 4);
    assert_eq!(cfg.engine["batch"].mode, EngineMode::Passive);

    let index = &cfg.job["index"];
    assert_eq!((index.steps, index.step_ms, index.report_period), (20, 25, 4));
    assert!(index.auto_delete);

    let nightly = &cfg.job["nightly"];
    assert_eq!(nightly.fail_at_step, Some(7));
    assert_eq!((nightly.steps, nightly.step_ms), (10, 100));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() -> TestResult {
    let dir = tempdir()?;
    let err = load_and_validate(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, DispatchError::IoError(_)), "{err}");
    Ok(())
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = parse_str("[engine.local\nworkers = 2").unwrap_err();
    assert!(matches!(err, DispatchError::TomlError(_)), "{err}");

    let err = parse_str("[engine.local]\nmode = \"eager\"").unwrap_err();
    assert!(matches!(err, DispatchError::TomlError(_)), "{err}");
}

#[test]
fn at_least_one_engine_is_required() {
    let err = ConfigFileBuilder::new().try_build().unwrap_err();
    assert!(err.to_string().contains("at least one [engine.<name>]"), "{err}");
}

#[test]
fn jobs_must_reference_known_engines() {
    let err = ConfigFileBuilder::new()
        .with_engine("local", 2, EngineMode::Active)
        .with_job("orphan", JobConfigBuilder::new("remote").build())
        .try_build()
        .unwrap_err();
    assert!(
        err.to_string().contains("job 'orphan' refers to unknown engine 'remote'"),
        "{err}"
    );
}

#[test]
fn zero_values_that_would_stall_are_rejected() {
    let err = ConfigFileBuilder::new()
        .with_engine("local", 0, EngineMode::Active)
        .try_build()
        .unwrap_err();
    assert!(matches!(err, DispatchError::ConfigError(ref m) if m.contains("workers")), "{err}");

    let err = ConfigFileBuilder::new()
        .with_engine("local", 1, EngineMode::Active)
        .with_job("empty", JobConfigBuilder::new("local").steps(0).build())
        .try_build()
        .unwrap_err();
    assert!(matches!(err, DispatchError::ConfigError(ref m) if m.contains("steps")), "{err}");

    let mut settings = fast_settings();
    settings.flush_spin_limit = 0;
    assert!(validate_settings(&settings).is_err());

    let mut settings = fast_settings();
    settings.time_unit_ms = 0;
    assert!(validate_settings(&settings).is_err());

    assert!(validate_settings(&fast_settings()).is_ok());
}

#[test]
fn oversized_time_unit_is_rejected_and_delays_saturate() {
    let mut settings = fast_settings();
    settings.time_unit_ms = MAX_TIME_UNIT_MS + 1;
    let err = validate_settings(&settings).unwrap_err();
    assert!(matches!(err, DispatchError::ConfigError(ref m) if m.contains("time_unit_ms")), "{err}");

    settings.time_unit_ms = u64::MAX;
    assert_eq!(settings.units(u32::MAX), MAX_POLL_DELAY);
    assert_eq!(fast_settings().units(3), Duration::from_millis(30));
}

#[test]
fn builder_produces_validated_config() {
    let cfg = ConfigFileBuilder::new()
        .with_settings(fast_settings())
        .with_engine("local", 2, EngineMode::Passive)
        .with_job(
            "demo",
            JobConfigBuilder::new("local")
                .steps(4)
                .step_ms(1)
                .report_period(3)
                .auto_delete(true)
                .build(),
        )
        .build();

    assert_eq!(cfg.dispatcher.time_unit_ms, 10);
    assert_eq!(cfg.job["demo"].engine, "local");
    assert!(jobdispatch::config::validate_config(&cfg).is_ok());
}
