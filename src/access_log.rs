//! Per-request access records.
//!
//! Every request produces one JSON object on the `gatehouse::access` tracing
//! target. Records with a non-empty `error` are emitted at error level so they
//! survive `--quiet`.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, OriginalUri, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::config::ACCESS_LOG_TARGET;

/// One access-log line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccessRecord {
    pub method: String,
    pub url: String,
    pub remote_addr: String,
    pub prefix: String,
    pub target: String,
    pub error: String,
    pub status_code: u16,
    pub redirection_url: String,
}

impl AccessRecord {
    /// Starts a record from the request line and peer address.
    ///
    /// The URL is the one the client sent, before any prefix stripping.
    pub fn from_request(request: &Request) -> Self {
        let url = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| original.0.to_string())
            .unwrap_or_else(|| request.uri().to_string());
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.to_string())
            .unwrap_or_default();

        Self {
            method: request.method().to_string(),
            url,
            remote_addr,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_code = status.as_u16();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// Emits the record, at error level when it carries an error.
    pub fn emit(&self) -> Result<(), serde_json::Error> {
        let line = serde_json::to_string(self)?;
        if self.error.is_empty() {
            tracing::info!(target: ACCESS_LOG_TARGET, "{line}");
        } else {
            tracing::error!(target: ACCESS_LOG_TARGET, "{line}");
        }
        Ok(())
    }

    /// Emits the record and passes `response` through, or replaces it with a
    /// 500 if the record could not be encoded.
    pub fn emit_then(&self, response: Response) -> Response {
        match self.emit() {
            Ok(()) => response,
            Err(e) => {
                tracing::error!(record = ?self, error = %e, "Failed to JSON-encode log message");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to JSON-encode log message",
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_record_fields() {
        let mut request = Request::builder()
            .method("PUT")
            .uri("/files/a.txt?x=1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4242))));

        let record = AccessRecord::from_request(&request)
            .with_status(StatusCode::CREATED)
            .with_error("nope");

        assert_eq!(record.method, "PUT");
        assert_eq!(record.url, "/files/a.txt?x=1");
        assert_eq!(record.remote_addr, "10.0.0.7:4242");
        assert_eq!(record.status_code, 201);
        assert_eq!(record.error, "nope");
    }

    #[test]
    fn test_original_uri_wins_over_rewritten_uri() {
        let mut request = Request::builder()
            .uri("/a.txt")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(OriginalUri("/pub/a.txt".parse().unwrap()));

        assert_eq!(AccessRecord::from_request(&request).url, "/pub/a.txt");
    }

    #[test]
    fn test_serialized_field_names() {
        let record = AccessRecord {
            method: "GET".to_string(),
            status_code: 301,
            redirection_url: "https://example.com/".to_string(),
            ..Default::default()
        };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();

        for key in [
            "method",
            "url",
            "remote_addr",
            "prefix",
            "target",
            "error",
            "status_code",
            "redirection_url",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["status_code"], 301);
        assert_eq!(json["error"], "");
    }
}
