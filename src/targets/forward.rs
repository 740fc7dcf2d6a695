//! Single-host reverse proxying.
//!
//! The upstream path is the target's own path joined with the stripped request
//! path, and the two query strings are merged. Method, end-to-end headers and
//! body pass through unchanged; hop-by-hop headers are dropped in both
//! directions and the client address is appended to `X-Forwarded-For`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use axum::http::uri::{Authority, Scheme};
use axum::http::{Uri, Version};
use axum::response::Response;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};

use crate::error::DispatchError;
use crate::paths;

/// Pooled client shared by every forwarding route.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Builds the upstream client; `https://` targets are verified against the
/// webpki root store.
pub fn upstream_client() -> Result<UpstreamClient, rustls::Error> {
    let root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    let connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}

/// Forwards requests to one upstream authority.
#[derive(Clone)]
pub struct Forwarder {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    base_query: Option<String>,
    client: UpstreamClient,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    /// Returns `None` unless `target` is an absolute `http`/`https` URL.
    pub fn new(target: &str, client: UpstreamClient) -> Option<Self> {
        let uri: Uri = target.parse().ok()?;
        let scheme = uri.scheme()?.clone();
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return None;
        }
        let authority = uri.authority()?.clone();

        Some(Self {
            scheme,
            authority,
            base_path: uri.path().to_string(),
            base_query: uri.query().map(str::to_string),
            client,
        })
    }

    /// Computes the upstream URI for a (prefix-stripped) request URI.
    pub fn upstream_uri(&self, request_uri: &Uri) -> Result<Uri, http::Error> {
        let path = paths::join(&self.base_path, request_uri.path());
        let queries: Vec<&str> = [self.base_query.as_deref(), request_uri.query()]
            .into_iter()
            .flatten()
            .filter(|q| !q.is_empty())
            .collect();
        let path_and_query = if queries.is_empty() {
            path
        } else {
            format!("{path}?{}", queries.join("&"))
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }

    pub async fn forward(&self, request: Request) -> Result<Response, DispatchError> {
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());

        let (mut parts, body) = request.into_parts();
        parts.uri = self.upstream_uri(&parts.uri)?;
        // The pooled connections speak HTTP/1.1 regardless of the inbound version.
        parts.version = Version::HTTP_11;
        remove_hop_by_hop(&mut parts.headers);
        if let Some(ip) = client_ip {
            append_forwarded_for(&mut parts.headers, ip);
        }

        tracing::debug!(upstream = %parts.uri, method = %parts.method, "Forwarding request");

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        remove_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {ip}", prior.join(", "))
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
