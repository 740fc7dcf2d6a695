//! Fallback for requests no route claims.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::access_log::AccessRecord;

/// Responds 404 and logs the miss as an error record.
pub fn respond(request: &Request) -> Response {
    AccessRecord::from_request(request)
        .with_status(StatusCode::NOT_FOUND)
        .with_error("not found")
        .emit_then((StatusCode::NOT_FOUND, "Not found").into_response())
}
