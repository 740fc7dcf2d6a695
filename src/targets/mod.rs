//! Terminal handlers at the end of each route's chain.

pub mod forward;
pub mod static_files;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};

use crate::config::ConfigError;

pub use forward::{upstream_client, Forwarder, UpstreamClient};
pub use static_files::StaticFiles;

/// Where a route sends its requests.
#[derive(Debug, Clone)]
pub enum DispatchTarget {
    Files(StaticFiles),
    Forward(Forwarder),
}

impl DispatchTarget {
    /// Interprets a route target: an absolute filesystem path (leading `/`)
    /// or an absolute `http`/`https` URL.
    pub fn parse(target: &str, client: &UpstreamClient) -> Result<Self, ConfigError> {
        if target.starts_with('/') {
            return Ok(DispatchTarget::Files(StaticFiles::new(target)?));
        }
        Forwarder::new(target, client.clone())
            .map(DispatchTarget::Forward)
            .ok_or_else(|| ConfigError::UnrecognizedTarget(target.to_string()))
    }

    pub async fn serve(&self, request: Request) -> Response {
        let result = match self {
            DispatchTarget::Files(files) => files.serve(request).await,
            DispatchTarget::Forward(forwarder) => forwarder.forward(request).await,
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }
}
