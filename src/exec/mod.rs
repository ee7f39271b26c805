// src/exec/mod.rs

//! Execution layer.
//!
//! The dispatcher never runs jobs itself; it hands them to engines.
//!
//! - [`backend`] provides the [`Engine`] trait and the [`EngineNotifier`]
//!   active engines use to report state changes.
//! - [`thread_engine`] is a local engine backed by the tokio blocking pool,
//!   usable in active or passive mode.
//! - [`simulated`] contains a step-based job used by the demo host.

pub mod backend;
pub mod simulated;
pub mod thread_engine;

pub use backend::{Engine, EngineHandle, EngineNotifier, EngineParams, EngineResult};
pub use simulated::SimulatedJob;
pub use thread_engine::ThreadEngine;
