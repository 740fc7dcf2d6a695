//! HTTP server module with TLS support.
//!
//! Three listener topologies, chosen by the configured TLS mode:
//! - **Plain**: the route table on the plaintext listener only
//! - **Static**: HTTPS from certificate files, plaintext redirects to HTTPS
//! - **Automatic**: HTTPS with ACME-issued certificates for one domain,
//!   plaintext answers HTTP-01 challenges and redirects everything else
//!
//! Both listeners shut down together, on SIGTERM/SIGINT or as soon as either
//! one fails.

pub mod acme;
mod idle;
mod lifecycle;
pub mod redirect;
mod server;
mod shutdown;
mod tls;

pub use lifecycle::{Lifecycle, ShutdownReport};
pub use server::{
    build_server_pair, resolve_bind_address, Endpoint, Listener, ServerError, ServerPair,
    StartupError,
};
pub use shutdown::termination_signal;

use crate::config::GatewayConfig;

/// Builds the listeners for `config` and serves until `termination` completes
/// or a listener fails.
pub async fn serve_gateway<F>(
    config: &GatewayConfig,
    termination: F,
) -> Result<ShutdownReport, StartupError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let pair = build_server_pair(config)?;
    Ok(Lifecycle::new().run(pair, termination).await)
}
