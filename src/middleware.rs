//! Per-route middleware: access logging and HTTP Basic authentication.
//!
//! Both layers are installed with `axum::middleware::from_fn_with_state` when
//! the route table is built. The auth layer sits outside the logging layer, so
//! a rejected request is logged by the auth layer and never reaches the
//! logging layer or the dispatch target.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, WWW_AUTHENTICATE},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::access_log::AccessRecord;
use crate::auth::{RouteGuard, Verdict};
use crate::config::AUTH_REALM;

/// Prefix and target of a route, as reported in access records.
#[derive(Debug, Clone)]
pub struct RouteLabel {
    pub prefix: String,
    pub target: String,
}

impl RouteLabel {
    fn record(&self, request: &Request) -> AccessRecord {
        AccessRecord {
            prefix: self.prefix.clone(),
            target: self.target.clone(),
            ..AccessRecord::from_request(request)
        }
    }
}

/// State of the auth layer for one route.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub label: Arc<RouteLabel>,
    pub guard: Arc<RouteGuard>,
}

/// Logs one access record per request once the inner handler has responded.
pub async fn access_log_layer(
    State(label): State<Arc<RouteLabel>>,
    request: Request,
    next: Next,
) -> Response {
    let record = label.record(&request);
    let response = next.run(request).await;
    record.with_status(response.status()).emit_then(response)
}

/// Rejects requests without acceptable Basic credentials with a 401 challenge.
pub async fn basic_auth_layer(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let Some((username, password)) = basic_credentials(request.headers()) else {
        let record = auth
            .label
            .record(&request)
            .with_status(StatusCode::UNAUTHORIZED)
            .with_error("no Auth");
        return record.emit_then(challenge("No basic Auth provided"));
    };

    let guard = auth.guard.clone();
    let submitted = username.clone();
    let verdict =
        tokio::task::spawn_blocking(move || guard.authenticate(&submitted, &password)).await;

    match verdict {
        Ok(Verdict::Granted) => next.run(request).await,
        Ok(Verdict::Rejected(reason)) => {
            let record = auth
                .label
                .record(&request)
                .with_status(StatusCode::UNAUTHORIZED)
                .with_error(format!("Auth not accepted for the user {username}: {reason}"));
            record.emit_then(challenge("Provided basic Auth not accepted"))
        }
        Err(e) => verification_failed(&auth.label, &request, &username, &e),
    }
}

/// 500 for a credential check that could not run to completion.
fn verification_failed(
    label: &RouteLabel,
    request: &Request,
    username: &str,
    error: &dyn std::fmt::Display,
) -> Response {
    let record = label
        .record(request)
        .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        .with_error(format!("Failed to authenticate the user {username}: {error}"));
    record.emit_then(
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to authenticate the user: {username}"),
        )
            .into_response(),
    )
}

fn challenge(message: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, format!("Basic realm=\"{AUTH_REALM}\""))],
        message,
    )
        .into_response()
}

/// Extracts `(username, password)` from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
