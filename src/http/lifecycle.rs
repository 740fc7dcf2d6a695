//! Runs the listeners together and shuts them down together.
//!
//! Every listener runs in its own task with its own `Handle`. A supervisor
//! task waits for either the termination signal or the first listener
//! failure, then starts a graceful shutdown on every handle. In automatic TLS
//! mode the certificate driver runs alongside and stops at the same moment.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum_server::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::SHUTDOWN_GRACE_PERIOD;

use super::server::{Listener, ServerPair};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Number of listeners (or tasks) that ended with an error.
    pub failures: usize,
}

/// Coordinates the listeners of one gateway process.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    failures: Arc<AtomicUsize>,
    stopping: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once shutdown has started, for whatever reason.
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Serves `pair` until `termination` completes or a listener fails, then
    /// drains every listener within the grace period.
    pub async fn run<F>(self, pair: ServerPair, termination: F) -> ShutdownReport
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (listeners, certificates) = pair.listeners();
        let mut tasks = JoinSet::new();
        let mut handles = Vec::with_capacity(listeners.len());

        for listener in listeners {
            let handle = Handle::new();
            handles.push(handle.clone());
            tasks.spawn(run_listener(
                listener,
                handle,
                self.failures.clone(),
                self.stopping.clone(),
            ));
        }

        if let Some(manager) = certificates {
            tasks.spawn(manager.drive(self.stopping.clone()));
        }

        tasks.spawn(supervise(handles, termination, self.stopping.clone()));

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Gateway task ended abnormally");
                self.failures.fetch_add(1, Ordering::SeqCst);
                self.stopping.cancel();
            }
        }

        ShutdownReport {
            failures: self.failures.load(Ordering::SeqCst),
        }
    }
}

async fn run_listener(
    listener: Listener,
    handle: Handle,
    failures: Arc<AtomicUsize>,
    stopping: CancellationToken,
) {
    let name = listener.name();
    let address = listener.address().to_string();
    tracing::info!(listener = name, %address, tls = listener.is_tls(), "Listening");

    match listener.serve(handle).await {
        Ok(()) => {
            tracing::info!("Goodbye from the {} server", name);
        }
        Err(e) => {
            tracing::error!(listener = name, %address, error = %e, "Failed to listen and serve");
            failures.fetch_add(1, Ordering::SeqCst);
            stopping.cancel();
        }
    }
}

async fn supervise<F>(handles: Vec<Handle>, termination: F, stopping: CancellationToken)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = termination => {
            tracing::info!("Termination requested");
        }
        _ = stopping.cancelled() => {
            tracing::warn!("A listener stopped, shutting down the others");
        }
    }

    stopping.cancel();
    for handle in &handles {
        handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    }
    tracing::info!(
        grace_period_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
        "Graceful shutdown initiated"
    );
}
