use crate::model::CommandStatus;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Captured result of one shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: CommandStatus,
}

/// Executes a fully substituted command line.
///
/// Implementations must not fail: spawn errors and timeouts are reported
/// through [`CommandStatus`] so a single bad command never stops a worker.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutput;
}

/// Runs commands through `<shell> -c <command>`.
///
/// On unix each shell gets its own process group. The group is killed on
/// timeout and whenever the run future is dropped, so neither the shell nor
/// anything it forked outlives an aborted worker.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

/// Kills a child's process group when dropped, unless disarmed first.
struct GroupGuard {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
}

impl GroupGuard {
    fn of(child: &Child) -> Self {
        #[cfg(unix)]
        {
            Self {
                pgid: child
                    .id()
                    .map(|id| nix::unistd::Pid::from_raw(id as i32)),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
            Self {}
        }
    }

    /// The shell exited on its own; leave the group alone.
    fn disarm(&mut self) {
        #[cfg(unix)]
        {
            self.pgid = None;
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => tracing::debug!(pgid = pgid.as_raw(), "killed process group"),
                Err(Errno::ESRCH) => {}
                Err(e) => {
                    tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to kill process group")
                }
            }
        }
    }
}

fn spawn_failed(shell: &str, e: std::io::Error) -> CommandOutput {
    tracing::warn!(shell, error = %e, "failed to spawn command");
    CommandOutput {
        stdout: Vec::new(),
        stderr: Vec::new(),
        status: CommandStatus::SpawnFailed(e.to_string()),
    }
}

fn status_of(status: std::process::ExitStatus) -> CommandStatus {
    if let Some(code) = status.code() {
        return CommandStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return CommandStatus::Signaled(signal);
        }
    }
    CommandStatus::Exited(-1)
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return spawn_failed(&self.shell, e),
        };
        let mut group = GroupGuard::of(&child);

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::debug!(command, ?limit, "command timed out, killed");
                    return CommandOutput {
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                        status: CommandStatus::TimedOut(limit),
                    };
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(out) => {
                group.disarm();
                CommandOutput {
                    stdout: out.stdout,
                    stderr: out.stderr,
                    status: status_of(out.status),
                }
            }
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to collect command output");
                CommandOutput {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    status: CommandStatus::SpawnFailed(e.to_string()),
                }
            }
        }
    }
}
