//! Gatehouse - a config-driven reverse-proxy gateway
//!
//! Requests are matched against a table of path prefixes, optionally checked
//! against HTTP Basic credentials, and dispatched either to a directory on
//! disk or to an upstream HTTP(S) server. TLS can be off, served from
//! certificate files, or obtained automatically over ACME.

pub mod access_log;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod paths;
pub mod routes;
pub mod targets;

pub use config::{ConfigError, GatewayConfig};
pub use http::{serve_gateway, ShutdownReport, StartupError};
pub use routes::build_router;
