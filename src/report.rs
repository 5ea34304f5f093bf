//! Result classification and console reporting.
//!
//! Every console write goes through one [`Reporter`] owned by a single
//! blocking task. Workers only send [`FuzzEvent`]s, so reports and the
//! progress line never interleave mid-write.

use crate::model::{
    Completion, ErrorMode, ExecutionResult, FuzzEvent, Report, RunConfig, RunSummary,
    SubstitutedCommand,
};
use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;

/// ANSI clear-to-end-of-line.
const CLEAR: &str = "\x1b[K";
/// Longest command label shown on the progress line.
const MAX_LABEL: usize = 60;

/// The parts of [`RunConfig`] that decide what gets reported.
#[derive(Debug, Clone)]
pub struct ReportPolicy {
    pub condition: Option<String>,
    pub ignore_error: bool,
    pub error_on: ErrorMode,
}

impl ReportPolicy {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            condition: cfg.condition().map(str::to_owned),
            ignore_error: cfg.ignore_error,
            error_on: cfg.error_on,
        }
    }
}

/// Decide which reports an execution produces.
///
/// With a condition, only output containing it is reported; without one,
/// every execution's output is. A failure adds an error report unless
/// errors are ignored.
pub fn classify(result: ExecutionResult, policy: &ReportPolicy) -> Completion {
    let output = String::from_utf8_lossy(&result.stdout).into_owned();
    let mut reports = Vec::with_capacity(2);

    match policy.condition.as_deref() {
        Some(condition) if output.contains(condition) => reports.push(Report::Match {
            condition: condition.to_owned(),
            output,
        }),
        Some(_) => {}
        None => reports.push(Report::Output { output }),
    }

    let mut suppressed = false;
    if policy.error_on.is_error(&result) {
        if policy.ignore_error {
            suppressed = true;
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let error = if stderr.trim().is_empty() {
                result.status.describe()
            } else {
                stderr.into_owned()
            };
            reports.push(Report::Error { error });
        }
    }

    Completion {
        command: result.command,
        reports,
        suppressed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable reports, optionally with a live progress line.
    Human { progress: bool },
    /// One JSON object per report.
    Json,
}

impl OutputMode {
    pub fn from_config(cfg: &RunConfig) -> Self {
        if cfg.json {
            OutputMode::Json
        } else {
            OutputMode::Human {
                progress: !cfg.quiet,
            }
        }
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(flatten)]
    command: &'a SubstitutedCommand,
    #[serde(flatten)]
    report: &'a Report,
}

/// Sole owner of the console stream and the progress counter.
pub struct Reporter<W: Write> {
    out: W,
    mode: OutputMode,
    summary: RunSummary,
    label: String,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, mode: OutputMode) -> Self {
        Self {
            out,
            mode,
            summary: RunSummary::default(),
            label: String::new(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Apply one event, emitting at most one write.
    pub fn handle(&mut self, event: FuzzEvent) -> std::io::Result<()> {
        let mut buf = String::new();
        match event {
            FuzzEvent::Loading => {
                if self.progress_enabled() {
                    buf.push_str(CLEAR);
                    buf.push_str("loading wordlist...\r");
                }
            }
            FuzzEvent::Started { total } => {
                self.summary.total = total;
                if self.progress_enabled() {
                    buf.push_str(CLEAR);
                    buf.push('\r');
                }
            }
            FuzzEvent::Executing(cmd) => {
                self.label = progress_label(&cmd.command);
                self.push_progress(&mut buf);
            }
            FuzzEvent::Completed(completion) => {
                self.record(&completion);
                self.render(&completion, &mut buf)?;
                self.push_progress(&mut buf);
            }
        }
        if !buf.is_empty() {
            self.out.write_all(buf.as_bytes())?;
            self.out.flush()?;
        }
        Ok(())
    }

    /// Clear the progress line and return the final counts.
    pub fn finish(mut self) -> std::io::Result<RunSummary> {
        if self.progress_enabled() {
            write!(self.out, "{CLEAR}")?;
        }
        self.out.flush()?;
        Ok(self.summary)
    }

    fn progress_enabled(&self) -> bool {
        matches!(self.mode, OutputMode::Human { progress: true })
    }

    fn record(&mut self, completion: &Completion) {
        let s = &mut self.summary;
        s.completed += 1;
        // The wordlist may have grown since it was counted.
        s.total = s.total.max(s.completed);
        for report in &completion.reports {
            match report {
                Report::Match { .. } => s.matched += 1,
                Report::Output { .. } => s.reported += 1,
                Report::Error { .. } => s.failed += 1,
            }
        }
        if completion.suppressed {
            s.suppressed += 1;
        }
    }

    fn render(&self, completion: &Completion, buf: &mut String) -> std::io::Result<()> {
        if completion.reports.is_empty() {
            return Ok(());
        }
        match self.mode {
            OutputMode::Json => {
                for report in &completion.reports {
                    let line = serde_json::to_string(&JsonLine {
                        command: &completion.command,
                        report,
                    })?;
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
            OutputMode::Human { progress } => {
                if progress {
                    buf.push_str(CLEAR);
                }
                for report in &completion.reports {
                    buf.push_str(&format_report(&completion.command.command, report));
                }
            }
        }
        Ok(())
    }

    fn push_progress(&self, buf: &mut String) {
        if !self.progress_enabled() {
            return;
        }
        buf.push_str(&format!(
            "{CLEAR}[{}/{}] {}\r",
            self.summary.completed, self.summary.total, self.label
        ));
    }
}

/// Human-readable block for one report, newline-terminated.
pub fn format_report(command: &str, report: &Report) -> String {
    let mut text = match report {
        Report::Match { condition, output } => format!(
            "[+] Condition met: {condition}\n[+] Command: {command}\n[+] Output: {output}"
        ),
        Report::Output { output } => format!("[+] Command: {command}\n[+] Output: {output}"),
        Report::Error { error } => format!("[-] Command: {command}\n[-] Error: {error}"),
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn progress_label(command: &str) -> String {
    let first_line = command.lines().next().unwrap_or_default();
    if first_line.chars().count() <= MAX_LABEL {
        return first_line.to_string();
    }
    let mut label: String = first_line.chars().take(MAX_LABEL - 3).collect();
    label.push_str("...");
    label
}

/// Spawn the blocking writer task that owns `out`.
///
/// The task ends once every sender is dropped and returns the run totals.
/// The first failed write ends it early with that error; dropping the
/// receiver then tells workers there is nowhere left to report.
pub fn spawn_reporter<W>(
    out: W,
    mode: OutputMode,
) -> (
    mpsc::UnboundedSender<FuzzEvent>,
    tokio::task::JoinHandle<std::io::Result<RunSummary>>,
)
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<FuzzEvent>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut reporter = Reporter::new(out, mode);
        while let Some(event) = rx.blocking_recv() {
            if let Err(e) = reporter.handle(event) {
                tracing::debug!(error = %e, "report stream closed, reporter exiting");
                return Err(e);
            }
        }
        reporter.finish()
    });
    (tx, handle)
}
