/// Child process lifecycle: launch in its own process group, report exit once,
/// stop with SIGTERM and escalate to SIGKILL after a grace period.
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

/// How long `stop` waits after SIGTERM before sending SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How the child's exit was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// The child was reaped with this status.
    Exited(ExitStatus),
    /// Waiting on the child failed, so its status is unknown.
    WaitFailed,
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited(status) if status.success())
    }
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildExit::Exited(status) => write!(f, "{status}"),
            ChildExit::WaitFailed => write!(f, "unknown (wait failed)"),
        }
    }
}

/// Errors that prevent the child from being launched.
#[derive(Debug)]
pub enum ProcessError {
    /// The command line contained no tokens.
    EmptyCommand,
    /// Spawning the executable failed.
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::EmptyCommand => write!(f, "invalid command: no executable given"),
            ProcessError::Spawn { program, source } => {
                write!(f, "failed to start child process {program}: {source}")
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::EmptyCommand => None,
            ProcessError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Split a command line on whitespace. No quoting rules apply.
pub fn split_command(command_line: &str) -> Vec<&str> {
    command_line.split_whitespace().collect()
}

/// A running (or finished) child process.
///
/// The `tokio::process::Child` itself is owned by a waiter task that reaps it
/// and publishes the exit exactly once; the handle only keeps the pid and a
/// receiver for that notification.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    exit_rx: watch::Receiver<Option<ChildExit>>,
    grace_period: Duration,
}

impl ProcessHandle {
    /// Launch `command_line` in a new process group with inherited stdio.
    pub fn start(command_line: &str) -> Result<Self, ProcessError> {
        let parts = split_command(command_line);
        let (program, args) = parts.split_first().ok_or(ProcessError::EmptyCommand)?;

        tracing::info!(command = %command_line, "launching child process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0) // New process group so the whole tree can be signalled
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        let pid = child.id().ok_or_else(|| ProcessError::Spawn {
            program: program.to_string(),
            source: std::io::Error::other("child was reaped before its pid was read"),
        })?;
        tracing::info!(pid, "child process started");

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!(pid, "child process exited successfully");
                    ChildExit::Exited(status)
                }
                Ok(status) => {
                    tracing::warn!(pid, %status, "child process exited with error");
                    ChildExit::Exited(status)
                }
                Err(e) => {
                    tracing::error!(pid, error = %e, "failed to wait for child process");
                    ChildExit::WaitFailed
                }
            };
            exit_tx.send_replace(Some(exit));
        });

        Ok(Self {
            pid,
            exit_rx,
            grace_period: DEFAULT_GRACE_PERIOD,
        })
    }

    /// Override the SIGTERM → SIGKILL grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The exit, if it has already been observed.
    pub fn try_exit(&self) -> Option<ChildExit> {
        *self.exit_rx.borrow()
    }

    #[cfg(test)]
    pub fn has_exited(&self) -> bool {
        self.try_exit().is_some()
    }

    /// Resolve once the child has exited. Safe to call from any number of places.
    pub async fn wait(&self) -> ChildExit {
        let mut rx = self.exit_rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(exit) = current {
                return exit;
            }
            if rx.changed().await.is_err() {
                // Waiter task went away without publishing.
                return ChildExit::WaitFailed;
            }
        }
    }

    /// Terminate the child's process group: SIGTERM, then SIGKILL once the
    /// grace period runs out.
    ///
    /// If the child already exited, leftover group members get a single
    /// SIGTERM and `stop` returns without waiting. The group id cannot be
    /// reused while any member is alive, so this never reaches an unrelated
    /// process group.
    pub async fn stop(self) -> ChildExit {
        let pgid = Pid::from_raw(self.pid as i32);

        if let Some(exit) = self.try_exit() {
            tracing::info!(pid = self.pid, %exit, "child process already exited");
            match killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    tracing::info!(pid = self.pid, "sent SIGTERM to leftover process group members")
                }
                Err(Errno::ESRCH) => {
                    tracing::debug!(pid = self.pid, "no process group members left")
                }
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "failed to signal leftover process group")
                }
            }
            return exit;
        }

        tracing::info!(pid = self.pid, "sending SIGTERM to child process group");
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            tracing::warn!(pid = self.pid, error = %e, "failed to send SIGTERM");
        }

        match tokio::time::timeout(self.grace_period, self.wait()).await {
            Ok(exit) => {
                tracing::info!(pid = self.pid, %exit, "child process terminated gracefully");
                exit
            }
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    grace_secs = self.grace_period.as_secs_f64(),
                    "child process did not terminate gracefully, sending SIGKILL"
                );
                if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                    tracing::warn!(pid = self.pid, error = %e, "failed to send SIGKILL");
                }
                let exit = self.wait().await;
                tracing::info!(pid = self.pid, %exit, "child process terminated forcefully");
                exit
            }
        }
    }
}
