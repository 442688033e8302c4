//! Shutdown signal bridge
//!
//! [`ShutdownSignal`] listens for SIGINT and SIGTERM and cancels a
//! [`CancellationToken`] on the first one. The lifecycle controller only
//! ever sees the token; this is the one module that touches OS signals.
//!
//! The listener stops after the first signal. A second SIGTERM while
//! deregistration is running is ignored.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// One-shot shutdown event driven by SIGINT/SIGTERM
pub struct ShutdownSignal {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl ShutdownSignal {
    /// Register the signal handlers and spawn the background listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();

        task_tracker.spawn(async move {
            let received = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = inner.cancelled() => return,
            };
            info!(signal = received, "Received shutdown signal");
            inner.cancel();
        });
        task_tracker.close();

        Ok(Self {
            task_tracker,
            cancellation_token: outer,
        })
    }

    /// Clone of the shutdown token
    pub fn token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Trigger shutdown without a signal
    pub fn trigger(&self) {
        self.cancellation_token.cancel();
    }

    /// Wait for the shutdown event and for the listener task to finish
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
