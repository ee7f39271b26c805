// src/dispatch/record.rs

//! Job records and the table that owns them.

use std::collections::HashMap;

use crate::exec::EngineHandle;
use crate::job::{JobHandle, JobKey};
use crate::listener::ListenerHandle;
use crate::types::{JobId, JobProgress, JobState};

/// Clamp a requested report period: `0` disables periodic progress, any
/// other value is raised to at least `min`.
pub fn clamp_report_period(requested: u32, min: u32) -> u32 {
    if requested == 0 { 0 } else { requested.max(min) }
}

/// Dispatcher bookkeeping for one accepted job.
pub(crate) struct JobRecord {
    pub id: JobId,
    pub job: JobHandle,
    pub state: JobState,
    pub engine: EngineHandle,
    pub engine_name: String,
    pub listener: Option<ListenerHandle>,
    /// Clamped report period in units; `0` means no periodic progress.
    pub report_period: u32,
    pub auto_delete: bool,
    /// Runs on a passive engine: the dispatcher collects the record once a
    /// status poll observes a terminal state.
    pub passive_engine: bool,
    /// Last snapshot pulled by the poll queue.
    pub progress: Option<JobProgress>,
    /// A progress item for this record is sitting in the poll queue.
    pub progress_scheduled: bool,
}

impl JobRecord {
    pub fn key(&self) -> JobKey {
        JobKey::of(&self.job)
    }

    pub fn reports_progress(&self) -> bool {
        self.report_period > 0
    }
}

/// All live records, indexed by id and by job instance.
///
/// Only ever touched under the dispatcher's main lock.
#[derive(Default)]
pub(crate) struct JobTable {
    by_id: HashMap<JobId, JobRecord>,
    by_key: HashMap<JobKey, JobId>,
    last_id: u64,
}

impl JobTable {
    pub fn allocate_id(&mut self) -> JobId {
        self.last_id += 1;
        JobId(self.last_id)
    }

    /// Whether `id` was ever handed out by this table.
    pub fn is_allocated(&self, id: JobId) -> bool {
        id.is_valid() && id.0 <= self.last_id
    }

    pub fn insert(&mut self, record: JobRecord) {
        debug_assert!(!self.by_id.contains_key(&record.id));
        debug_assert!(!self.by_key.contains_key(&record.key()));
        self.by_key.insert(record.key(), record.id);
        self.by_id.insert(record.id, record);
    }

    pub fn remove(&mut self, id: JobId) -> Option<JobRecord> {
        let record = self.by_id.remove(&id)?;
        self.by_key.remove(&record.key());
        Some(record)
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.by_id.get_mut(&id)
    }

    pub fn id_of(&self, key: JobKey) -> Option<JobId> {
        self.by_key.get(&key).copied()
    }

    pub fn contains_job(&self, key: JobKey) -> bool {
        self.by_key.contains_key(&key)
    }

    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn drain(&mut self) -> Vec<JobRecord> {
        self.by_key.clear();
        self.by_id.drain().map(|(_, rec)| rec).collect()
    }
}
