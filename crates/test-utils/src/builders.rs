#![allow(dead_code)]

use std::collections::BTreeMap;

use jobdispatch::config::{ConfigFile, DispatcherSettings, EngineConfig, JobConfig, RawConfigFile};
use jobdispatch::errors::Result;
use jobdispatch::types::EngineMode;

/// Settings with a 10ms time unit and short retry/poll intervals so that
/// timing-dependent tests finish quickly.
pub fn fast_settings() -> DispatcherSettings {
    DispatcherSettings {
        time_unit_ms: 10,
        min_report_period: 3,
        status_poll_period: 2,
        start_retry_limit: 3,
        start_retry_backoff_ms: 1,
        flush_spin_limit: 50,
        idle_tick_ms: 5,
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                dispatcher: DispatcherSettings::default(),
                engine: BTreeMap::new(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_settings(mut self, settings: DispatcherSettings) -> Self {
        self.config.dispatcher = settings;
        self
    }

    pub fn with_engine(mut self, name: &str, workers: usize, mode: EngineMode) -> Self {
        self.config
            .engine
            .insert(name.to_string(), EngineConfig { workers, mode });
        self
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.config.job.insert(name.to_string(), job);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(engine: &str) -> Self {
        Self {
            job: JobConfig {
                engine: engine.to_string(),
                steps: 10,
                step_ms: 100,
                fail_at_step: None,
                report_period: 0,
                auto_delete: false,
            },
        }
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.job.steps = steps;
        self
    }

    pub fn step_ms(mut self, ms: u64) -> Self {
        self.job.step_ms = ms;
        self
    }

    pub fn fail_at(mut self, step: u32) -> Self {
        self.job.fail_at_step = Some(step);
        self
    }

    pub fn report_period(mut self, units: u32) -> Self {
        self.job.report_period = units;
        self
    }

    pub fn auto_delete(mut self, yes: bool) -> Self {
        self.job.auto_delete = yes;
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}
