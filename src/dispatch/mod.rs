// src/dispatch/mod.rs

//! Job dispatching.
//!
//! - [`dispatcher`] is the public façade: start, control and query jobs.
//! - [`state`] validates lifecycle transitions.
//! - [`pipeline`] serialises state changes and progress into ordered
//!   listener notifications.
//! - [`poll_queue`] schedules progress pulls and passive-engine status polls;
//!   [`driver`] runs it on a tokio runtime.
//! - [`registry`], [`record`] and [`cancel`] hold the bookkeeping.

pub mod cancel;
pub mod dispatcher;
pub mod driver;
pub(crate) mod pipeline;
pub mod poll_queue;
pub(crate) mod record;
pub mod registry;
pub mod state;

pub use cancel::CancellationSet;
pub use dispatcher::{Dispatcher, StartOptions};
pub use driver::{PollDriver, spawn_poll_driver};
pub use poll_queue::{PollItem, PollMode, PollQueue};
pub use record::clamp_report_period;
pub use registry::{EngineEntry, EngineRegistry};
pub use state::{check_transition, is_valid_transition};
