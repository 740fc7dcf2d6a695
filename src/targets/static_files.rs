//! Static file serving below a fixed root directory.
//!
//! The request path (already stripped of the route prefix) is percent-decoded
//! and lexically cleaned before it is joined to the root, so `..` segments can
//! never leave the root. Files are answered by tower-http's `ServeFile`, which
//! handles content types, ranges and conditional requests. Directories get a
//! plain listing; there is no index-file lookup.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::config::ConfigError;
use crate::error::DispatchError;
use crate::paths;

/// Serves files and directory listings from `root`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(ConfigError::UnrecognizedTarget(String::new()));
        }
        Ok(Self { root })
    }

    /// Maps a request path to a filesystem path inside the root.
    pub fn resolve(&self, request_path: &str) -> PathBuf {
        let decoded = urlencoding::decode(request_path)
            .unwrap_or(Cow::Borrowed(request_path));
        let cleaned = paths::clean(&decoded);
        self.root.join(cleaned.trim_start_matches('/'))
    }

    pub async fn serve(&self, request: Request) -> Result<Response, DispatchError> {
        let request_path = request.uri().path().to_string();
        let full_path = self.resolve(&request_path);

        match tokio::fs::metadata(&full_path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DispatchError::NotFound),
            Ok(metadata) if metadata.is_dir() => {
                if request_path.ends_with('/') {
                    list_directory(&full_path).await
                } else {
                    Ok(redirect_to_directory(&request_path, request.uri().query()))
                }
            }
            // Other metadata failures are left to ServeFile to report.
            _ => {
                let response = ServeFile::new(&full_path)
                    .oneshot(request)
                    .await
                    .unwrap_or_else(|never| match never {});
                Ok(response.map(Body::new))
            }
        }
    }
}

/// Redirects `.../dir` to `.../dir/` with a relative location, so it resolves
/// against the client's unstripped URL.
fn redirect_to_directory(request_path: &str, query: Option<&str>) -> Response {
    let name = request_path.rsplit('/').next().unwrap_or_default();
    let location = match query {
        Some(query) => format!("{name}/?{query}"),
        None => format!("{name}/"),
    };
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
}

async fn list_directory(dir: &Path) -> Result<Response, DispatchError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(from_io)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(from_io)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        names.push((name, is_dir));
    }
    names.sort();

    let mut body = String::from("<pre>\n");
    for (name, is_dir) in &names {
        let slash = if *is_dir { "/" } else { "" };
        body.push_str(&format!(
            "<a href=\"{}{slash}\">{}{slash}</a>\n",
            urlencoding::encode(name),
            escape_html(name)
        ));
    }
    body.push_str("</pre>\n");

    Ok(([(CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response())
}

fn from_io(e: std::io::Error) -> DispatchError {
    match e.kind() {
        ErrorKind::NotFound => DispatchError::NotFound,
        ErrorKind::PermissionDenied => DispatchError::Forbidden,
        _ => DispatchError::Io(e),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
