// src/config/validate.rs

use crate::config::model::{ConfigFile, DispatcherSettings, MAX_TIME_UNIT_MS, RawConfigFile};
use crate::errors::{DispatchError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::DispatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.dispatcher, raw.engine, raw.job))
    }
}

/// Validate an already-built configuration (e.g. one assembled in code).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_settings(&cfg.dispatcher)?;
    for (name, job) in cfg.job.iter() {
        if !cfg.engine.contains_key(&job.engine) {
            return Err(unknown_engine(name, &job.engine));
        }
    }
    Ok(())
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_engines(cfg)?;
    validate_settings(&cfg.dispatcher)?;
    validate_engines(cfg)?;
    validate_jobs(cfg)?;
    Ok(())
}

fn ensure_has_engines(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.is_empty() {
        return Err(DispatchError::ConfigError(
            "config must contain at least one [engine.<name>] section".to_string(),
        ));
    }
    Ok(())
}

/// Check the `[dispatcher]` section for values that would stall the
/// dispatcher.
pub fn validate_settings(settings: &DispatcherSettings) -> Result<()> {
    if settings.time_unit_ms == 0 {
        return Err(DispatchError::ConfigError(
            "[dispatcher].time_unit_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.time_unit_ms > MAX_TIME_UNIT_MS {
        return Err(DispatchError::ConfigError(format!(
            "[dispatcher].time_unit_ms must be <= {MAX_TIME_UNIT_MS} (got {})",
            settings.time_unit_ms
        )));
    }
    if settings.min_report_period == 0 {
        return Err(DispatchError::ConfigError(
            "[dispatcher].min_report_period must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.status_poll_period == 0 {
        return Err(DispatchError::ConfigError(
            "[dispatcher].status_poll_period must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.flush_spin_limit == 0 {
        return Err(DispatchError::ConfigError(
            "[dispatcher].flush_spin_limit must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_engines(cfg: &RawConfigFile) -> Result<()> {
    for (name, engine) in cfg.engine.iter() {
        if engine.workers == 0 {
            return Err(DispatchError::ConfigError(format!(
                "engine '{}' must have workers >= 1 (got 0)",
                name
            )));
        }
    }
    Ok(())
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        if !cfg.engine.contains_key(&job.engine) {
            return Err(unknown_engine(name, &job.engine));
        }
        if job.steps == 0 {
            return Err(DispatchError::ConfigError(format!(
                "job '{}' must have steps >= 1 (got 0)",
                name
            )));
        }
    }
    Ok(())
}

fn unknown_engine(job: &str, engine: &str) -> DispatchError {
    DispatchError::ConfigError(format!(
        "job '{}' refers to unknown engine '{}'",
        job, engine
    ))
}
