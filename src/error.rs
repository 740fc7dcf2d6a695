use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

/// Failure while serving one request from a dispatch target.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("File not found")]
    NotFound,

    #[error("Permission denied")]
    Forbidden,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Invalid upstream URI: {0}")]
    UpstreamUri(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::NotFound => StatusCode::NOT_FOUND,
            DispatchError::Forbidden => StatusCode::FORBIDDEN,
            DispatchError::Upstream(_) => {
                tracing::error!(error = %self, "Upstream error");
                StatusCode::BAD_GATEWAY
            }
            _ => {
                tracing::error!("Internal error: {:?}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match status {
            StatusCode::BAD_GATEWAY => "Bad Gateway".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DispatchError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DispatchError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DispatchError::Upstream("connection refused".into())
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            DispatchError::Io(io::Error::other("disk on fire"))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
