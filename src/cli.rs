use crate::engine::runner::{CommandRunner, ShellRunner};
use crate::error::FuzzError;
use crate::model::{ErrorMode, RunConfig, RunSummary};
use crate::orchestrator::{run_controller, RunOutcome};
use crate::report::{spawn_reporter, OutputMode};
use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Upper bound on `--threads`; each worker may hold a child process.
pub const MAX_THREADS: usize = 1024;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "commandfuzz",
    version,
    about = "Fuzz a command with a list of arguments"
)]
pub struct Cli {
    /// The command to execute with FUZZ as the argument placeholder
    #[arg(short = 'e', long)]
    pub execute: Option<String>,

    /// The wordlist to use as input to the command
    #[arg(short = 'w', long)]
    pub wordlist: Option<PathBuf>,

    /// The condition to check for in the output
    #[arg(short = 'c', long)]
    pub condition: Option<String>,

    /// Ignore errors and continue fuzzing
    #[arg(short = 'i', long)]
    pub ignore_error: bool,

    /// Escape ' " ` and \ in each entry so they cannot break the command
    #[arg(short = 's', long)]
    pub sanitize: bool,

    /// Number of commands to run concurrently
    #[arg(short = 't', long, default_value_t = 4)]
    pub threads: usize,

    /// Kill commands that run longer than this (e.g. 5s, 250ms)
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Stop dispatching new commands after the first condition match
    #[arg(long)]
    pub stop_on_match: bool,

    /// What counts as a failed command
    #[arg(long, value_enum, default_value_t = ErrorMode::Exit)]
    pub error_on: ErrorMode,

    /// Shell used to run each command
    #[arg(long, default_value = "sh")]
    pub shell: String,

    /// Print one JSON object per report instead of text
    #[arg(long)]
    pub json: bool,

    /// Hide the progress line and final summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// `--execute` and `--wordlist` are required together.
    pub fn missing_required(&self) -> bool {
        self.execute.is_none() || self.wordlist.is_none()
    }
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` applies unless
/// `--verbose` is given.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<RunConfig, FuzzError> {
    let template = args
        .execute
        .clone()
        .ok_or_else(|| FuzzError::InvalidConfig("--execute is required".into()))?;
    let wordlist = args
        .wordlist
        .clone()
        .ok_or_else(|| FuzzError::InvalidConfig("--wordlist is required".into()))?;
    if args.threads == 0 || args.threads > MAX_THREADS {
        return Err(FuzzError::InvalidConfig(format!(
            "--threads must be between 1 and {MAX_THREADS}"
        )));
    }
    Ok(RunConfig {
        template,
        wordlist,
        condition: args.condition.clone(),
        ignore_error: args.ignore_error,
        sanitize: args.sanitize,
        threads: args.threads,
        timeout: args.timeout.map(Into::into),
        stop_on_match: args.stop_on_match,
        error_on: args.error_on,
        shell: args.shell.clone(),
        json: args.json,
        quiet: args.quiet,
    })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
fn interrupt_signal() -> impl Future<Output = ()> {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for interrupts");
            futures::future::pending::<()>().await;
        }
    }
}

fn summary_line(summary: &RunSummary, stopped_early: bool) -> String {
    let mut line = format!(
        "[*] Done: {}/{} executed, {} matched, {} failed",
        summary.completed, summary.total, summary.matched, summary.failed
    );
    if summary.suppressed > 0 {
        line.push_str(&format!(", {} errors ignored", summary.suppressed));
    }
    if stopped_early {
        line.push_str(" (stopped after first match)");
    }
    line
}

/// Run a full fuzzing session and return its totals.
pub async fn run(args: Cli) -> Result<RunSummary> {
    let cfg = Arc::new(build_config(&args)?);
    tracing::debug!(
        config = %serde_json::to_string(&*cfg).unwrap_or_default(),
        "configuration"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new(cfg.shell.clone(), cfg.timeout));
    let (event_tx, reporter) = spawn_reporter(std::io::stdout(), OutputMode::from_config(&cfg));

    let outcome = run_controller(cfg.clone(), runner, event_tx, interrupt_signal()).await;
    let stopped_early = match outcome {
        Ok(RunOutcome::Interrupted) => return Err(FuzzError::Interrupted.into()),
        Ok(RunOutcome::Completed { stopped_early, .. }) => stopped_early,
        Err(e) => {
            // Let the reporter clear the loading line before the error is printed.
            let _ = reporter.await;
            return Err(e);
        }
    };

    let summary = reporter
        .await
        .context("reporter task failed")?
        .context("failed to write reports")?;
    if !cfg.quiet && !cfg.json {
        eprintln!("{}", summary_line(&summary, stopped_early));
    }
    Ok(summary)
}
