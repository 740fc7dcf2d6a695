//! HTTP to HTTPS redirect responder.
//!
//! Used on the plaintext listener whenever TLS is enabled. Every request is
//! answered with a 301 to the same request URI on the HTTPS endpoint.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::{HOST, LOCATION};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use crate::access_log::AccessRecord;

/// Router that redirects every request to `https_address`.
pub fn redirect_router(https_address: &str) -> Router {
    let https_address: Arc<str> = Arc::from(https_address);

    Router::new().fallback(any(move |request: Request| {
        let https_address = https_address.clone();
        async move { redirect_to_https(&https_address, &request) }
    }))
}

fn redirect_to_https(https_address: &str, request: &Request) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()));

    let Some(host) = host else {
        return AccessRecord::from_request(request)
            .with_status(StatusCode::BAD_REQUEST)
            .with_error("no Host header to redirect with")
            .emit_then((StatusCode::BAD_REQUEST, "Missing Host header").into_response());
    };

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let https_url = https_url(https_address, host, path);

    let mut record = AccessRecord::from_request(request).with_status(StatusCode::MOVED_PERMANENTLY);
    record.redirection_url = https_url.clone();
    record.emit_then((StatusCode::MOVED_PERMANENTLY, [(LOCATION, https_url)]).into_response())
}

/// Computes the HTTPS URL for a request.
///
/// A bare-port address (`:8443`) keeps the request's host and swaps the port;
/// any other address is used literally as the authority.
pub fn https_url(https_address: &str, host: &str, path_and_query: &str) -> String {
    if https_address.starts_with(':') {
        format!("https://{}{https_address}{path_and_query}", host_without_port(host))
    } else {
        format!("https://{https_address}{path_and_query}")
    }
}

fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal: keep the brackets, drop what follows them.
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    }
}
