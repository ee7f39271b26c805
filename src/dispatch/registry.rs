// src/dispatch/registry.rs

//! Name to engine lookup.
//!
//! Guarded by its own lock so that registering or looking up engines never
//! contends with job bookkeeping.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{error, info};

use crate::exec::{EngineHandle, EngineNotifier};

/// A registered engine.
#[derive(Clone)]
pub struct EngineEntry {
    pub name: String,
    pub engine: EngineHandle,
    /// Whether the engine pushes state changes (as opposed to being polled).
    pub active: bool,
}

impl std::fmt::Debug for EngineEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEntry")
            .field("name", &self.name)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct EngineRegistry {
    entries: RwLock<BTreeMap<String, EngineEntry>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, EngineEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, EngineEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `engine` under `name`. Duplicate names are rejected and the
    /// existing entry is kept. Active engines are attached to the notifier
    /// produced by `notifier`.
    pub fn register(
        &self,
        name: &str,
        engine: EngineHandle,
        notifier: impl FnOnce() -> EngineNotifier,
    ) -> bool {
        let mut entries = self.write();

        if entries.contains_key(name) {
            error!(engine = %name, "engine is already registered");
            return false;
        }

        let active = engine.is_active();
        if active {
            engine.attach(notifier());
        }

        info!(engine = %name, active, "engine registered");
        entries.insert(
            name.to_string(),
            EngineEntry {
                name: name.to_string(),
                engine: Arc::clone(&engine),
                active,
            },
        );
        true
    }

    pub fn lookup(&self, name: &str) -> Option<EngineEntry> {
        let entry = self.read().get(name).cloned();
        if entry.is_none() {
            error!(engine = %name, "engine is not registered");
        }
        entry
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Broadcast a best-effort cancel request to every engine.
    pub fn request_cancel_all(&self) {
        for entry in self.read().values() {
            entry.engine.request_cancel();
        }
    }

    /// Remove and return all entries.
    pub fn drain(&self) -> Vec<EngineEntry> {
        std::mem::take(&mut *self.write()).into_values().collect()
    }
}
