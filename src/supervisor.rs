/// The shutdown race and the termination sequence.
///
/// `Starting → Running → ShuttingDown → Stopped`. The child is launched first;
/// the stop-file watcher and the HTTP endpoint then run in the background
/// while the supervisor waits for either the shared shutdown signal or the
/// child's own exit. Whichever comes first, the child is stopped exactly once
/// and the background tasks get a bounded window to wind down.
use crate::config::Config;
use crate::endpoint;
use crate::process::{ChildExit, ProcessError, ProcessHandle};
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use crate::stopfile::StopFileWatcher;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Every bound the shutdown sequence relies on.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// SIGTERM → SIGKILL escalation.
    pub grace: Duration,
    /// HTTP in-flight request drain.
    pub drain: Duration,
    /// Waiting for background tasks after the child has stopped.
    pub watchers: Duration,
    /// Stop-file poll interval.
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            grace: crate::process::DEFAULT_GRACE_PERIOD,
            drain: endpoint::DEFAULT_DRAIN_TIMEOUT,
            watchers: Duration::from_secs(5),
            poll: crate::stopfile::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub reason: ShutdownReason,
    pub child_exit: ChildExit,
}

#[derive(Debug)]
pub enum SupervisorError {
    /// The child could not be launched; nothing else was started.
    Launch(ProcessError),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::Launch(e) => write!(f, "failed to launch child process: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Launch(e) => Some(e),
        }
    }
}

pub struct Supervisor {
    config: Config,
    timeouts: Timeouts,
    shutdown: ShutdownSignal,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            timeouts: Timeouts::default(),
            shutdown: ShutdownSignal::new(),
            state: SupervisorState::Starting,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Handle for external triggers such as the OS signal listener.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    fn transition(&mut self, next: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?next, "supervisor state change");
        self.state = next;
    }

    /// Launch the child, wait for the first shutdown trigger, then tear down.
    pub async fn run(mut self) -> Result<Outcome, SupervisorError> {
        let process = ProcessHandle::start(&self.config.command)
            .map_err(SupervisorError::Launch)?
            .with_grace_period(self.timeouts.grace);
        self.transition(SupervisorState::Running);
        tracing::info!(pid = process.pid(), "supervising child process");

        let mut tasks = JoinSet::new();
        tasks.spawn(
            StopFileWatcher::new(self.config.stop_file.clone())
                .with_interval(self.timeouts.poll)
                .watch(self.shutdown.clone()),
        );
        tasks.spawn(endpoint::run(
            self.config.port.clone(),
            self.shutdown.clone(),
            self.timeouts.drain,
        ));

        let reason = tokio::select! {
            reason = self.shutdown.wait() => {
                tracing::info!(%reason, "shutdown signal received, terminating child process");
                reason
            }
            exit = process.wait() => {
                tracing::info!(%exit, "child process exited");
                // Wake the watchers; a trigger that raced us in keeps its claim.
                self.shutdown.trigger(ShutdownReason::ChildExited);
                self.shutdown.reason().unwrap_or(ShutdownReason::ChildExited)
            }
        };

        self.transition(SupervisorState::ShuttingDown);
        let child_exit = process.stop().await;

        let finished = tokio::time::timeout(self.timeouts.watchers, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "background task failed");
                }
            }
        })
        .await;
        match finished {
            Ok(()) => tracing::info!("all background tasks finished"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeouts.watchers.as_secs_f64(),
                    "timeout waiting for background tasks to finish"
                );
                tasks.abort_all();
            }
        }

        self.transition(SupervisorState::Stopped);
        Ok(Outcome { reason, child_exit })
    }
}
