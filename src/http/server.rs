//! Listener construction and serving.
//!
//! The TLS mode picks the listener topology:
//! - Plain: one plaintext listener serving the route table
//! - Static: HTTPS from PEM files, plaintext redirects to it
//! - Automatic: HTTPS via ACME, plaintext answers HTTP-01 challenges and
//!   redirects everything else
//!
//! Every accepted connection is closed after a period without reads or writes,
//! whichever HTTP version it speaks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use rustls::ServerConfig;
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ConfigError, GatewayConfig, TlsMode, LISTENER_TIMEOUT};
use crate::routes::build_router;

use super::acme::{challenge_router, CertificateManager};
use super::idle::IdleTimeoutAcceptor;
use super::redirect::redirect_router;
use super::{shutdown, tls};

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Invalid listen address: {0}")]
    Address(String),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// How a listener accepts connections.
pub enum Endpoint {
    Plain,
    PemFiles { cert_path: String, key_path: String },
    Automatic(Arc<ServerConfig>),
}

/// One network listener and the application it serves.
pub struct Listener {
    name: &'static str,
    address: String,
    app: Router,
    endpoint: Endpoint,
    idle_timeout: Duration,
}

impl Listener {
    pub fn new(name: &'static str, address: impl Into<String>, app: Router, endpoint: Endpoint) -> Self {
        Self {
            name,
            address: address.into(),
            app: with_transport_layers(app),
            endpoint,
            idle_timeout: LISTENER_TIMEOUT,
        }
    }

    /// Overrides how long a connection may sit without reads or writes.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self.endpoint, Endpoint::Plain)
    }

    /// Binds and serves until `handle` is shut down or the listener fails.
    pub async fn serve(self, handle: Handle) -> Result<(), ServerError> {
        let addr = resolve_bind_address(&self.address).await?;
        let app = self.app.into_make_service_with_connect_info::<SocketAddr>();
        let idle = IdleTimeoutAcceptor::new(self.idle_timeout);

        match self.endpoint {
            Endpoint::Plain => {
                let mut server = axum_server::bind(addr).acceptor(idle).handle(handle);
                apply_timeouts(&mut server);
                server.serve(app).await?;
            }
            Endpoint::PemFiles {
                cert_path,
                key_path,
            } => {
                let server_config = tls::pem_file_config(&cert_path, &key_path).await?;
                let rustls_config = RustlsConfig::from_config(Arc::new(server_config));

                let reload = shutdown::reload_on_hangup(rustls_config.clone(), cert_path, key_path);

                let mut server = axum_server::bind_rustls(addr, rustls_config)
                    .map(|tls| tls.acceptor(idle))
                    .handle(handle);
                apply_timeouts(&mut server);
                let served = server.serve(app).await;
                reload.abort();
                served?;
            }
            Endpoint::Automatic(server_config) => {
                let rustls_config = RustlsConfig::from_config(server_config);
                let mut server = axum_server::bind_rustls(addr, rustls_config)
                    .map(|tls| tls.acceptor(idle))
                    .handle(handle);
                apply_timeouts(&mut server);
                server.serve(app).await?;
            }
        }

        Ok(())
    }
}

fn with_transport_layers(app: Router) -> Router {
    app.layer(RequestBodyTimeoutLayer::new(LISTENER_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

fn apply_timeouts<A>(server: &mut Server<A>) {
    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(LISTENER_TIMEOUT);
}

/// Resolves a listen address. A bare `:port` binds every IPv4 interface.
pub async fn resolve_bind_address(address: &str) -> Result<SocketAddr, ServerError> {
    let candidate = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    let mut resolved = tokio::net::lookup_host(candidate)
        .await
        .map_err(|e| ServerError::Address(format!("{}: {}", address, e)))?;
    resolved
        .next()
        .ok_or_else(|| ServerError::Address(address.to_string()))
}

/// Everything the lifecycle runner needs: the plaintext listener, the optional
/// HTTPS listener and, in automatic mode, the certificate manager to drive.
pub struct ServerPair {
    pub http: Listener,
    pub https: Option<Listener>,
    pub certificates: Option<Arc<CertificateManager>>,
}

impl ServerPair {
    pub fn listeners(self) -> (Vec<Listener>, Option<Arc<CertificateManager>>) {
        let listeners = std::iter::once(self.http).chain(self.https).collect();
        (listeners, self.certificates)
    }
}

/// Failure to assemble the gateway from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Builds the listeners for a validated configuration.
pub fn build_server_pair(config: &GatewayConfig) -> Result<ServerPair, StartupError> {
    let app = build_router(config)?;

    match config.tls_mode() {
        TlsMode::Plain => {
            tracing::warn!("TLS disabled - serving routes on plain HTTP");
            Ok(ServerPair {
                http: Listener::new("HTTP", &config.http_address, app, Endpoint::Plain),
                https: None,
                certificates: None,
            })
        }
        TlsMode::Static {
            cert_path,
            key_path,
        } => {
            tracing::info!(cert = %cert_path, key = %key_path, "Using certificate files");
            Ok(ServerPair {
                http: redirect_listener(config),
                https: Some(Listener::new(
                    "HTTPS",
                    &config.https_address,
                    app,
                    Endpoint::PemFiles {
                        cert_path,
                        key_path,
                    },
                )),
                certificates: None,
            })
        }
        TlsMode::Automatic { cache_dir, domain } => {
            let manager = Arc::new(CertificateManager::new(
                &cache_dir,
                &domain,
                config.letsencrypt_email.as_deref(),
                config.letsencrypt_staging,
            )?);
            let server_config = Arc::new(manager.server_config()?);
            let challenges = challenge_router(
                manager.challenges(),
                redirect_router(&config.https_address),
            );
            Ok(ServerPair {
                http: Listener::new("HTTP", &config.http_address, challenges, Endpoint::Plain),
                https: Some(Listener::new(
                    "HTTPS",
                    &config.https_address,
                    app,
                    Endpoint::Automatic(server_config),
                )),
                certificates: Some(manager),
            })
        }
    }
}

fn redirect_listener(config: &GatewayConfig) -> Listener {
    Listener::new(
        "HTTP",
        &config.http_address,
        redirect_router(&config.https_address),
        Endpoint::Plain,
    )
}
