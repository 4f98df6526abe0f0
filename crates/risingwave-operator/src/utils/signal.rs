use std::future::Future;

use futures::FutureExt;
use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to install the {kind} handler"))]
pub struct SignalError {
    kind: &'static str,
    source: std::io::Error,
}

/// Fans a shutdown request out to every controller.
///
/// All handles resolve once the process receives SIGTERM or SIGINT, whichever comes first.
pub struct SignalWatcher {
    shutdown_rx: watch::Receiver<bool>,
}

impl SignalWatcher {
    pub fn install() -> Result<Self, SignalError> {
        let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu { kind: "SIGTERM" })?;
        let mut sigint = signal(SignalKind::interrupt()).context(SignalSnafu { kind: "SIGINT" })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let received = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = received, "shutting down controllers");
            shutdown_tx.send_replace(true);
        });

        Ok(Self { shutdown_rx })
    }

    /// A future that completes on shutdown. Handles are independent of each other.
    pub fn handle(&self) -> impl Future<Output = ()> + Send + Sync + 'static {
        let mut shutdown_rx = self.shutdown_rx.clone();

        async move {
            // An error means the sender is gone, which only happens after shutdown was sent.
            let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
        }
        .boxed()
        .shared()
    }
}
