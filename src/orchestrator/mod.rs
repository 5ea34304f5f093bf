//! Application-level orchestration.
//!
//! Owns the run lifecycle (load, dispatch, drain, shutdown) and interrupt
//! handling. The CLI layer calls into this module; workers and reporting
//! live in `engine` and `report`.

mod controller;

pub use controller::{run_controller, Lifecycle, RunOutcome};
