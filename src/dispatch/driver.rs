// src/dispatch/driver.rs

//! Background task that drives the poll queue on a tokio runtime.
//!
//! Each tick drains every due item. The items themselves run on the blocking
//! pool since they call into jobs, engines and listeners synchronously.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::dispatch::dispatcher::Dispatcher;

/// Handle to a running poll driver.
#[derive(Debug)]
pub struct PollDriver {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl PollDriver {
    /// Stop the driver and wait for the current tick to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "poll driver task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn the driver on the current runtime. It also ends once the
/// dispatcher is shut down or the returned handle is dropped.
pub fn spawn_poll_driver(dispatcher: Dispatcher) -> PollDriver {
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut ticker = time::interval(dispatcher.settings().idle_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(tick = ?dispatcher.settings().idle_tick(), "poll driver started");

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            if dispatcher.is_shut_down() {
                break;
            }

            loop {
                let d = dispatcher.clone();
                match tokio::task::spawn_blocking(move || d.poll_once()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!(error = %e, "poll item panicked");
                        break;
                    }
                }
                if dispatcher.is_shut_down() || !matches!(stop_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    debug!("poll driver stopped");
                    return;
                }
            }
        }

        debug!("poll driver stopped");
    });

    PollDriver {
        stop: Some(stop_tx),
        handle,
    }
}
