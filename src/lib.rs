//! Command-line fuzzing harness.
//!
//! Substitutes each wordlist entry into a command template, runs the
//! resulting commands on a bounded worker pool and reports their output.

pub mod cli;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod report;
