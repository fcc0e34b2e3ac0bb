/// The shutdown decision shared by every trigger.
///
/// Up to four sources race to request shutdown (stop file, `/quit`, child
/// exit, OS signal). The first `trigger` wins; every later call is a no-op.
/// Readers observe the decision through `wait`, including readers that
/// subscribe after it was made.
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;

/// Which trigger decided the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The stop file appeared.
    StopFile,
    /// The stop file path could not be made absolute, so it cannot be watched.
    StopFileUnresolvable,
    /// `/quit` was requested over HTTP.
    QuitRequest,
    /// The child exited on its own.
    ChildExited,
    /// The supervisor received an OS termination signal.
    Signal(OsSignal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsSignal {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for OsSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsSignal::Interrupt => write!(f, "SIGINT"),
            OsSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::StopFile => write!(f, "stop file detected"),
            ShutdownReason::StopFileUnresolvable => write!(f, "stop file path unresolvable"),
            ShutdownReason::QuitRequest => write!(f, "quit requested"),
            ShutdownReason::ChildExited => write!(f, "child process exited"),
            ShutdownReason::Signal(sig) => write!(f, "received {sig}"),
        }
    }
}

/// Write-once, read-many shutdown notification. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Returns `true` only for the call that made the decision.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let won = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if won {
            tracing::info!(%reason, "shutdown requested");
        } else {
            tracing::debug!(%reason, "shutdown already requested, ignoring trigger");
        }
        won
    }

    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The winning reason, if shutdown has been requested.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                // `self` holds the sender, so the channel cannot close under us.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// What to do with a received OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Run (or keep running) the graceful sequence.
    Shutdown,
    /// Exit the supervisor at once.
    Exit,
}

/// Routes OS signals into the shutdown signal.
///
/// The first SIGINT/SIGTERM always goes through the graceful sequence, even
/// when another trigger already started it. Only a second OS signal exits
/// immediately.
#[derive(Debug)]
pub struct SignalRouter {
    shutdown: ShutdownSignal,
    received: u32,
}

impl SignalRouter {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            received: 0,
        }
    }

    pub fn handle(&mut self, sig: OsSignal) -> SignalAction {
        self.received += 1;
        if self.received > 1 {
            tracing::warn!(signal = %sig, "second signal during shutdown, exiting immediately");
            return SignalAction::Exit;
        }
        tracing::info!(signal = %sig, "received signal");
        self.shutdown.trigger(ShutdownReason::Signal(sig));
        SignalAction::Shutdown
    }
}

/// SIGINT/SIGTERM streams, registered before the child is launched so a
/// signal can never hit the default disposition.
pub struct SignalListener {
    interrupt: Signal,
    terminate: Signal,
}

impl SignalListener {
    /// Register the handlers. Must be called from inside the runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Feed received signals to the router until it asks for an immediate exit.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        let mut router = SignalRouter::new(shutdown);
        loop {
            let sig = tokio::select! {
                _ = self.interrupt.recv() => OsSignal::Interrupt,
                _ = self.terminate.recv() => OsSignal::Terminate,
            };
            if router.handle(sig) == SignalAction::Exit {
                std::process::exit(0);
            }
        }
    }
}
