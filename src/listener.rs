// src/listener.rs

//! Listener capability exposed to callers, plus a channel-backed adapter.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{JobId, JobProgress, JobState};

/// Receives notifications about a single job (or a group of jobs).
///
/// For a given job, calls arrive in the order the dispatcher validated the
/// transitions. Implementations may call back into the dispatcher.
pub trait JobListener: Send + Sync {
    fn on_job_state_changed(&self, id: JobId, state: JobState);

    fn on_job_progress(&self, _id: JobId, _progress: &JobProgress) {}
}

pub type ListenerHandle = Arc<dyn JobListener>;

/// Notification as delivered over a [`ChannelListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobNotification {
    StateChanged { id: JobId, state: JobState },
    Progress { id: JobId, progress: JobProgress },
}

impl JobNotification {
    pub fn id(&self) -> JobId {
        match self {
            JobNotification::StateChanged { id, .. } | JobNotification::Progress { id, .. } => *id,
        }
    }
}

/// Listener that translates callbacks into [`JobNotification`]s on an
/// unbounded tokio channel, so an async host can consume them without the
/// dispatcher ever blocking on it.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<JobNotification>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<JobNotification>) -> Self {
        Self { tx }
    }

    /// Create a listener together with the receiving half of its channel.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<JobNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    fn forward(&self, notification: JobNotification) {
        if self.tx.send(notification).is_err() {
            debug!("notification receiver dropped; discarding notification");
        }
    }
}

impl JobListener for ChannelListener {
    fn on_job_state_changed(&self, id: JobId, state: JobState) {
        self.forward(JobNotification::StateChanged { id, state });
    }

    fn on_job_progress(&self, id: JobId, progress: &JobProgress) {
        self.forward(JobNotification::Progress {
            id,
            progress: progress.clone(),
        });
    }
}
