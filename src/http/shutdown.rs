//! Signal handling.
//!
//! Handles:
//! - SIGTERM/SIGINT: resolves [`termination_signal`], which starts the
//!   coordinated graceful shutdown
//! - SIGHUP: certificate reload (static TLS mode only)

#[cfg(unix)]
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;

#[cfg(unix)]
use super::tls;

/// Completes when the process receives Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal is
/// simply never observed.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Reloads the certificate and key files whenever SIGHUP is received.
///
/// The returned task runs until aborted.
#[cfg(unix)]
pub fn reload_on_hangup(tls_config: RustlsConfig, cert_path: String, key_path: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };

        while sighup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading TLS certificates");

            match tls::pem_file_config(&cert_path, &key_path).await {
                Ok(server_config) => {
                    tls_config.reload_from_config(Arc::new(server_config));
                    tracing::info!(cert = %cert_path, key = %key_path, "TLS certificates reloaded successfully");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %cert_path,
                        key = %key_path,
                        "Failed to reload TLS certificates"
                    );
                }
            }
        }
    })
}

#[cfg(not(unix))]
pub fn reload_on_hangup(_tls_config: RustlsConfig, _cert_path: String, _key_path: String) -> JoinHandle<()> {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
    tokio::spawn(async {})
}
