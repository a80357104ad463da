//! Signal handling for the daemon loop.
//!
//! [`Shutdown`] turns SIGTERM/SIGINT (Ctrl+C on Windows) into a cancelled
//! [`CancellationToken`]. The observation loop checks the token between runs,
//! so an active run always finishes and records its observations.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token when the process is asked to stop.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct Shutdown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Shutdown {
    /// Installs the signal listeners.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if signal registration fails.
    #[allow(clippy::unnecessary_wraps)] // registration is fallible on Unix only
    pub fn listen() -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tracker.spawn(async move {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                };
                tracing::info!(signal = name, "Shutdown requested, stopping after the current run");
                trigger.cancel();
            });
        }

        #[cfg(windows)]
        {
            tracker.spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!(signal = "ctrl-c", "Shutdown requested, stopping after the current run");
                trigger.cancel();
            });
        }

        tracker.close();
        Ok(Self { tracker, token })
    }

    /// Token cancelled on the first shutdown signal.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for a signal and for the listener task to exit.
    pub async fn wait(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}
