//! The route table: prefix matching, prefix stripping and per-route chains.
//!
//! Each configured route is compiled once into its own small axum `Router`
//! whose only handler is the dispatch target, wrapped by the access-log layer
//! and, when the route demands credentials, by the Basic auth layer. The
//! table matches requests the way a classic path multiplexer does: patterns
//! ending in `/` match their whole subtree, other patterns match exactly, and
//! the longest matching pattern wins. Requests that match nothing are answered
//! by the not-found handler unless a route claims `/`.

pub mod not_found;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::LOCATION, uri::PathAndQuery, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tower::ServiceExt;

use crate::auth::RouteGuard;
use crate::config::{ConfigError, GatewayConfig};
use crate::middleware::{access_log_layer, basic_auth_layer, AuthState, RouteLabel};
use crate::paths;
use crate::targets::{upstream_client, DispatchTarget};

/// A compiled route: its pattern and the chain serving it.
#[derive(Clone)]
struct MountedRoute {
    prefix: String,
    service: Router,
}

impl MountedRoute {
    fn matches(&self, path: &str) -> bool {
        if self.prefix.ends_with('/') {
            path.starts_with(&self.prefix)
        } else {
            path == self.prefix
        }
    }
}

/// Immutable table of compiled routes, longest pattern first.
#[derive(Clone)]
pub struct RouteTable {
    routes: Vec<MountedRoute>,
}

enum Lookup<'a> {
    Route(&'a MountedRoute),
    AddSlash,
    Miss,
}

impl RouteTable {
    /// Compiles every configured route. Assumes a validated configuration.
    pub fn build(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let client = upstream_client()?;
        let mut routes = Vec::with_capacity(config.routes.len());

        for route in &config.routes {
            let target = Arc::new(DispatchTarget::parse(&route.target, &client)?);
            let label = Arc::new(RouteLabel {
                prefix: route.prefix.clone(),
                target: route.target.clone(),
            });
            let guard = RouteGuard::new(
                route
                    .auth_ids
                    .iter()
                    .filter_map(|id| config.auths.get(id))
                    .cloned()
                    .collect(),
            );

            let mut service = Router::new()
                .fallback(move |request: Request| async move { target.serve(request).await })
                .layer(middleware::from_fn_with_state(label.clone(), access_log_layer));

            let authenticated = !guard.allows_all();
            if authenticated {
                let auth = AuthState {
                    label,
                    guard: Arc::new(guard),
                };
                service = service.layer(middleware::from_fn_with_state(auth, basic_auth_layer));
            }

            tracing::info!(
                prefix = %route.prefix,
                target = %route.target,
                authenticated,
                "Route configured"
            );

            routes.push(MountedRoute {
                prefix: route.prefix.clone(),
                service,
            });
        }

        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    fn lookup(&self, path: &str) -> Lookup<'_> {
        let exact = self.routes.iter().any(|route| route.prefix == path);
        if !exact && !path.ends_with('/') {
            let with_slash = format!("{path}/");
            if self.routes.iter().any(|route| route.prefix == with_slash) {
                return Lookup::AddSlash;
            }
        }

        match self.routes.iter().find(|route| route.matches(path)) {
            Some(route) => Lookup::Route(route),
            None => Lookup::Miss,
        }
    }

    /// Routes one request through the table.
    pub async fn dispatch(&self, request: Request) -> Response {
        let path = request.uri().path();
        let query = request.uri().query();

        if request.method() != Method::CONNECT {
            let cleaned = paths::clean_keep_trailing_slash(path);
            if cleaned != path {
                return moved_permanently(&cleaned, query);
            }
        }

        match self.lookup(path) {
            Lookup::Route(route) => {
                let stripped = strip_prefix(request.uri(), &route.prefix);
                let mut request = request;
                match stripped {
                    Some(uri) => *request.uri_mut() = uri,
                    None => return (StatusCode::BAD_REQUEST, "Bad request").into_response(),
                }
                route
                    .service
                    .clone()
                    .oneshot(request)
                    .await
                    .unwrap_or_else(|never| match never {})
            }
            Lookup::AddSlash => moved_permanently(&format!("{path}/"), query),
            Lookup::Miss => not_found::respond(&request),
        }
    }

    /// Wraps the table into an axum router that sends every request through it.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(self))
    }
}

async fn dispatch(State(table): State<Arc<RouteTable>>, request: Request) -> Response {
    table.dispatch(request).await
}

/// Builds the gateway router from a validated configuration.
pub fn build_router(config: &GatewayConfig) -> Result<Router, ConfigError> {
    Ok(RouteTable::build(config)?.into_router())
}

/// Removes `prefix` from the URI path, keeping the query. The remainder always
/// starts with `/`.
fn strip_prefix(uri: &Uri, prefix: &str) -> Option<Uri> {
    let rest = uri.path().strip_prefix(prefix)?;
    let path = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    };
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

fn moved_permanently(path: &str, query: Option<&str>) -> Response {
    let location = match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    tracing::debug!(%location, "Redirecting to canonical path");
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
}
