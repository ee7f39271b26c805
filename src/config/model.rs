// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::EngineMode;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [dispatcher]
/// time_unit_ms = 1000
/// min_report_period = 3
///
/// [engine.local]
/// workers = 4
/// mode = "active"
///
/// [job.index]
/// engine = "local"
/// steps = 20
/// step_ms = 250
/// report_period = 3
/// auto_delete = true
/// ```
///
/// All sections are optional at parse time; validation then requires at
/// least one engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// Engines from `[engine.<name>]`, keyed by the name jobs use to select
    /// them.
    #[serde(default)]
    pub engine: BTreeMap<String, EngineConfig>,

    /// Simulated jobs from `[job.<name>]`, started by the demo host.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub dispatcher: DispatcherSettings,
    pub engine: BTreeMap<String, EngineConfig>,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        dispatcher: DispatcherSettings,
        engine: BTreeMap<String, EngineConfig>,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self {
            dispatcher,
            engine,
            job,
        }
    }
}

/// Longest delay the poll queue schedules ahead.
pub const MAX_POLL_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Upper bound accepted for `[dispatcher].time_unit_ms` (one day).
pub const MAX_TIME_UNIT_MS: u64 = 24 * 60 * 60 * 1000;

/// `[dispatcher]` section: timing and retry knobs of the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    /// Length of one report-period unit in milliseconds.
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,

    /// Smallest accepted non-zero report period, in units.
    #[serde(default = "default_min_report_period")]
    pub min_report_period: u32,

    /// Interval between status polls of passive engines, in units.
    #[serde(default = "default_status_poll_period")]
    pub status_poll_period: u32,

    /// How many times a busy engine is retried when starting a job.
    #[serde(default = "default_start_retry_limit")]
    pub start_retry_limit: u32,

    /// Initial backoff between start retries; doubled after every attempt.
    #[serde(default = "default_start_retry_backoff_ms")]
    pub start_retry_backoff_ms: u64,

    /// Flush attempts an engine callback makes before giving up with
    /// `EngineBusy`.
    #[serde(default = "default_flush_spin_limit")]
    pub flush_spin_limit: u32,

    /// Period of the poll driver tick.
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
}

fn default_time_unit_ms() -> u64 {
    1000
}

fn default_min_report_period() -> u32 {
    3
}

fn default_status_poll_period() -> u32 {
    15
}

fn default_start_retry_limit() -> u32 {
    5
}

fn default_start_retry_backoff_ms() -> u64 {
    2
}

fn default_flush_spin_limit() -> u32 {
    20
}

fn default_idle_tick_ms() -> u64 {
    100
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            time_unit_ms: default_time_unit_ms(),
            min_report_period: default_min_report_period(),
            status_poll_period: default_status_poll_period(),
            start_retry_limit: default_start_retry_limit(),
            start_retry_backoff_ms: default_start_retry_backoff_ms(),
            flush_spin_limit: default_flush_spin_limit(),
            idle_tick_ms: default_idle_tick_ms(),
        }
    }
}

impl DispatcherSettings {
    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms.max(1))
    }

    /// Duration of `units` report-period units, capped at [`MAX_POLL_DELAY`].
    pub fn units(&self, units: u32) -> Duration {
        self.time_unit()
            .checked_mul(units)
            .map_or(MAX_POLL_DELAY, |d| d.min(MAX_POLL_DELAY))
    }

    pub fn status_poll_interval(&self) -> Duration {
        self.units(self.status_poll_period.max(1))
    }

    /// Sleep before start retry number `attempt` (zero-based).
    pub fn start_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.start_retry_backoff_ms.saturating_mul(factor))
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }
}

/// `[engine.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of jobs the engine runs at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// `"active"` (default) or `"passive"`.
    #[serde(default)]
    pub mode: EngineMode,
}

fn default_workers() -> usize {
    4
}

/// `[job.<name>]` section describing a simulated job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Name of the engine the job is started on.
    pub engine: String,

    #[serde(default = "default_steps")]
    pub steps: u32,

    #[serde(default = "default_step_ms")]
    pub step_ms: u64,

    /// Zero-based step at which the job fails, if any.
    #[serde(default)]
    pub fail_at_step: Option<u32>,

    /// Progress report period in units; `0` disables periodic progress.
    #[serde(default)]
    pub report_period: u32,

    #[serde(default)]
    pub auto_delete: bool,
}

fn default_steps() -> u32 {
    10
}

fn default_step_ms() -> u64 {
    100
}
