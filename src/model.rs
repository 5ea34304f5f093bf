use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder token replaced by each wordlist entry.
pub const PLACEHOLDER: &str = "FUZZ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub template: String,
    pub wordlist: PathBuf,
    #[serde(default)]
    pub condition: Option<String>,
    pub ignore_error: bool,
    pub sanitize: bool,
    pub threads: usize,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub stop_on_match: bool,
    #[serde(default)]
    pub error_on: ErrorMode,
    pub shell: String,
    pub json: bool,
    pub quiet: bool,
}

impl RunConfig {
    /// The condition to search for, if one was configured and is non-empty.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Loading,
    Running,
    Draining,
    Shutdown,
}

impl LifecycleState {
    /// Whether `next` is a legal successor of this state.
    ///
    /// Interrupts may jump to `Shutdown` from anywhere.
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Loading) | (Loading, Running) | (Running, Draining) | (Draining, Shutdown)
        ) || (next == Shutdown && self != Shutdown)
    }
}

/// A template with every placeholder replaced by one wordlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubstitutedCommand {
    /// 1-based position of the entry in the wordlist.
    pub ordinal: u64,
    pub command: String,
}

/// How the spawned command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(i32),
    Signaled(i32),
    TimedOut(Duration),
    SpawnFailed(String),
}

impl CommandStatus {
    pub fn success(&self) -> bool {
        matches!(self, CommandStatus::Exited(0))
    }

    pub fn describe(&self) -> String {
        match self {
            CommandStatus::Exited(code) => format!("exit status {code}"),
            CommandStatus::Signaled(sig) => format!("terminated by signal {sig}"),
            CommandStatus::TimedOut(d) => {
                format!("timed out after {}", humantime::format_duration(*d))
            }
            CommandStatus::SpawnFailed(msg) => format!("failed to spawn: {msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub command: SubstitutedCommand,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: CommandStatus,
}

/// What counts as a failed execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Non-zero exit status (or signal, timeout, spawn failure).
    #[default]
    Exit,
    /// Anything written to standard error.
    Stderr,
    /// Either of the above.
    Any,
}

impl ErrorMode {
    pub fn is_error(self, result: &ExecutionResult) -> bool {
        let failed = !result.status.success();
        let noisy = !result.stderr.is_empty();
        match self {
            ErrorMode::Exit => failed,
            ErrorMode::Stderr => noisy,
            ErrorMode::Any => failed || noisy,
        }
    }
}

/// One console report produced for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Match { condition: String, output: String },
    Output { output: String },
    Error { error: String },
}

/// Classified outcome of one execution, handed from a worker to the reporter.
///
/// `reports` is empty when nothing is to be printed. `suppressed` records an
/// error that was dropped because errors are ignored.
#[derive(Debug, Clone)]
pub struct Completion {
    pub command: SubstitutedCommand,
    pub reports: Vec<Report>,
    pub suppressed: bool,
}

impl Completion {
    pub fn is_match(&self) -> bool {
        self.reports
            .iter()
            .any(|r| matches!(r, Report::Match { .. }))
    }
}

/// Events consumed by the reporter.
#[derive(Debug, Clone)]
pub enum FuzzEvent {
    Loading,
    Started { total: u64 },
    Executing(SubstitutedCommand),
    Completed(Completion),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: u64,
    pub completed: u64,
    pub matched: u64,
    pub reported: u64,
    pub failed: u64,
    pub suppressed: u64,
}
