// src/dispatch/cancel.rs

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use crate::types::JobId;

/// Ids for which cancellation has been requested.
///
/// Independent of record lifetime: an id stays marked after its record is
/// gone, so a cancel racing a completion (or a late engine notification after
/// `delete`) is never mistaken for a fresh request. Readers do not need the
/// dispatcher's main lock; writers always hold it.
#[derive(Debug, Default)]
pub struct CancellationSet {
    ids: RwLock<HashSet<JobId>>,
}

impl CancellationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id`. Returns `false` if it was already marked.
    pub fn mark(&self, id: JobId) -> bool {
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_mark_reports_already_marked() {
        let set = CancellationSet::new();
        assert!(set.mark(JobId(7)));
        assert!(!set.mark(JobId(7)));
        assert!(set.contains(JobId(7)));
        assert!(!set.contains(JobId(8)));
    }
}
