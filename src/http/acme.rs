//! Automatic certificates over ACME HTTP-01, restricted to a single domain.
//!
//! The plaintext listener answers `/.well-known/acme-challenge/{token}` from a
//! [`ChallengeStore`] before falling through to the HTTPS redirect. Issued
//! certificates are cached in the configured directory and handed to TLS
//! handshakes by [`SingleDomainResolver`], which only serves the configured
//! domain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, SystemTime};

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::access_log::AccessRecord;

use super::server::ServerError;
use super::tls;

pub const CHALLENGE_PATH: &str = "/.well-known/acme-challenge/{token}";

/// Certificates older than this are renewed (Let's Encrypt issues for 90 days).
const RENEW_AFTER: Duration = Duration::from_secs(60 * 24 * 60 * 60);
const CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
const RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_ATTEMPTS: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    #[error("ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    #[error("Failed to build the certificate request: {0}")]
    Request(#[from] rcgen::Error),

    #[error("Certificate cache error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("Invalid account credentials: {0}")]
    Account(#[from] serde_json::Error),

    #[error(transparent)]
    Tls(#[from] ServerError),

    #[error("Order for {domain} failed: {reason}")]
    Order { domain: String, reason: String },
}

/// Key authorizations of pending HTTP-01 challenges, by token.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    responses: RwLock<HashMap<String, String>>,
}

impl ChallengeStore {
    pub async fn insert(&self, token: &str, key_authorization: &str) {
        self.responses
            .write()
            .await
            .insert(token.to_string(), key_authorization.to_string());
        tracing::debug!(token = %token, "Added ACME challenge");
    }

    pub async fn get(&self, token: &str) -> Option<String> {
        self.responses.read().await.get(token).cloned()
    }

    pub async fn remove(&self, token: &str) {
        self.responses.write().await.remove(token);
    }
}

/// Serves pending challenges and sends every other request to `fallback`.
pub fn challenge_router(challenges: Arc<ChallengeStore>, fallback: Router) -> Router {
    Router::new()
        .route(CHALLENGE_PATH, get(answer_challenge))
        .with_state(challenges)
        .fallback_service(fallback)
}

async fn answer_challenge(
    State(challenges): State<Arc<ChallengeStore>>,
    UrlPath(token): UrlPath<String>,
    request: Request,
) -> Response {
    let record = AccessRecord::from_request(&request);
    match challenges.get(&token).await {
        Some(key_authorization) => record
            .with_status(StatusCode::OK)
            .emit_then(key_authorization.into_response()),
        None => record
            .with_status(StatusCode::NOT_FOUND)
            .with_error(format!("unknown ACME challenge token: {}", token))
            .emit_then(StatusCode::NOT_FOUND.into_response()),
    }
}

/// Certificate resolver that refuses every server name except one.
#[derive(Debug)]
pub struct SingleDomainResolver {
    domain: String,
    current: StdRwLock<Option<Arc<CertifiedKey>>>,
}

impl SingleDomainResolver {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            current: StdRwLock::new(None),
        }
    }

    pub fn allows(&self, server_name: Option<&str>) -> bool {
        server_name.is_some_and(|name| name.eq_ignore_ascii_case(&self.domain))
    }

    pub fn install(&self, key: CertifiedKey) {
        match self.current.write() {
            Ok(mut current) => *current = Some(Arc::new(key)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(key)),
        }
    }

    pub fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResolvesServerCert for SingleDomainResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if !self.allows(client_hello.server_name()) {
            tracing::warn!(
                requested = ?client_hello.server_name(),
                allowed = %self.domain,
                "Refusing certificate for host"
            );
            return None;
        }
        let certificate = self.certificate();
        if certificate.is_none() {
            tracing::warn!(domain = %self.domain, "No certificate issued yet");
        }
        certificate
    }
}

/// Where issued material is kept inside the cache directory.
#[derive(Debug, Clone)]
pub struct CertificatePaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub account_path: PathBuf,
}

impl CertificatePaths {
    pub fn for_domain(cache_dir: &Path, domain: &str) -> Self {
        let cert_dir = cache_dir.join("certs").join(domain);
        Self {
            cert_path: cert_dir.join("cert.pem"),
            key_path: cert_dir.join("key.pem"),
            account_path: cache_dir.join("account.json"),
        }
    }
}

/// Issues and renews the certificate for one domain.
#[derive(Debug)]
pub struct CertificateManager {
    domain: String,
    contact: Option<String>,
    directory_url: &'static str,
    paths: CertificatePaths,
    challenges: Arc<ChallengeStore>,
    resolver: Arc<SingleDomainResolver>,
}

impl CertificateManager {
    /// Prepares the cache directory and loads a previously issued certificate.
    pub fn new(
        cache_dir: &str,
        domain: &str,
        contact_email: Option<&str>,
        staging: bool,
    ) -> Result<Self, ServerError> {
        let paths = CertificatePaths::for_domain(Path::new(cache_dir), domain);
        if let Some(cert_dir) = paths.cert_path.parent() {
            std::fs::create_dir_all(cert_dir).map_err(|e| {
                ServerError::TlsConfig(format!(
                    "Failed to create ACME cache directory '{}': {}",
                    cache_dir, e
                ))
            })?;
        }

        let env_name = if staging { "staging" } else { "production" };
        tracing::info!(
            domain = %domain,
            cache = %cache_dir,
            environment = %env_name,
            "Setting up automatic certificates"
        );
        if staging {
            tracing::warn!(
                "Using Let's Encrypt staging environment - certificates will NOT be trusted by browsers"
            );
        }

        let manager = Self {
            domain: domain.to_string(),
            contact: contact_email.map(|email| format!("mailto:{}", email)),
            directory_url: if staging {
                LetsEncrypt::Staging.url()
            } else {
                LetsEncrypt::Production.url()
            },
            paths,
            challenges: Arc::new(ChallengeStore::default()),
            resolver: Arc::new(SingleDomainResolver::new(domain)),
        };
        manager.load_cached();
        Ok(manager)
    }

    fn load_cached(&self) {
        let (Ok(cert_pem), Ok(key_pem)) = (
            std::fs::read(&self.paths.cert_path),
            std::fs::read(&self.paths.key_path),
        ) else {
            return;
        };
        match tls::certified_key(&cert_pem, &key_pem) {
            Ok(key) => {
                self.resolver.install(key);
                tracing::info!(path = %self.paths.cert_path.display(), "Loaded cached certificate");
            }
            Err(e) => {
                tracing::warn!(path = %self.paths.cert_path.display(), error = %e, "Ignoring cached certificate");
            }
        }
    }

    pub fn challenges(&self) -> Arc<ChallengeStore> {
        self.challenges.clone()
    }

    pub fn resolver(&self) -> Arc<SingleDomainResolver> {
        self.resolver.clone()
    }

    pub fn paths(&self) -> &CertificatePaths {
        &self.paths
    }

    /// TLS configuration for the HTTPS listener.
    pub fn server_config(&self) -> Result<ServerConfig, ServerError> {
        tls::resolver_config(self.resolver.clone())
    }

    /// Whether a certificate is missing or old enough to renew.
    pub fn needs_certificate(&self) -> bool {
        if self.resolver.certificate().is_none() {
            return true;
        }
        let age = std::fs::metadata(&self.paths.cert_path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        match age {
            Some(age) => age >= RENEW_AFTER,
            None => true,
        }
    }

    async fn account(&self) -> Result<Account, AcmeError> {
        if let Ok(saved) = tokio::fs::read(&self.paths.account_path).await {
            let credentials: AccountCredentials = serde_json::from_slice(&saved)?;
            return Ok(Account::from_credentials(credentials).await?);
        }

        let contact: Vec<&str> = self.contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            self.directory_url,
            None,
        )
        .await?;
        tokio::fs::write(&self.paths.account_path, serde_json::to_vec(&credentials)?).await?;
        tracing::info!(path = %self.paths.account_path.display(), "Registered ACME account");
        Ok(account)
    }

    fn order_failed(&self, reason: impl Into<String>) -> AcmeError {
        AcmeError::Order {
            domain: self.domain.clone(),
            reason: reason.into(),
        }
    }

    /// Runs one HTTP-01 order and installs the resulting certificate.
    pub async fn issue(&self) -> Result<(), AcmeError> {
        tracing::info!(domain = %self.domain, directory = %self.directory_url, "Requesting certificate");
        let account = self.account().await?;
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &[Identifier::Dns(self.domain.clone())],
            })
            .await?;

        let mut tokens = Vec::new();
        for authorization in order.authorizations().await? {
            match authorization.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => return Err(self.order_failed(format!("authorization is {:?}", status))),
            }
            let challenge = authorization
                .challenges
                .iter()
                .find(|challenge| challenge.r#type == ChallengeType::Http01)
                .ok_or_else(|| self.order_failed("no HTTP-01 challenge offered"))?;

            let key_authorization = order.key_authorization(challenge);
            self.challenges
                .insert(&challenge.token, key_authorization.as_str())
                .await;
            tokens.push(challenge.token.clone());
            order.set_challenge_ready(&challenge.url).await?;
        }

        let outcome = self.finish_order(&mut order).await;
        for token in &tokens {
            self.challenges.remove(token).await;
        }
        let (cert_pem, key_pem) = outcome?;

        let key = tls::certified_key(cert_pem.as_bytes(), key_pem.as_bytes())?;
        tokio::fs::write(&self.paths.cert_path, &cert_pem).await?;
        tokio::fs::write(&self.paths.key_path, &key_pem).await?;
        self.resolver.install(key);
        tracing::info!(domain = %self.domain, "Installed new certificate");
        Ok(())
    }

    async fn finish_order(
        &self,
        order: &mut instant_acme::Order,
    ) -> Result<(String, String), AcmeError> {
        let mut status = order.refresh().await?.status;
        for _ in 0..POLL_ATTEMPTS {
            if matches!(status, OrderStatus::Ready | OrderStatus::Invalid) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            status = order.refresh().await?.status;
        }
        if status != OrderStatus::Ready {
            return Err(self.order_failed(format!("order is {:?}", status)));
        }

        let mut params = CertificateParams::new(vec![self.domain.clone()])?;
        params.distinguished_name = DistinguishedName::new();
        let key_pair = KeyPair::generate()?;
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        for _ in 0..POLL_ATTEMPTS {
            if let Some(cert_pem) = order.certificate().await? {
                return Ok((cert_pem, key_pair.serialize_pem()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(self.order_failed("certificate was not issued in time"))
    }

    /// Issues and renews the certificate until `stop` is cancelled.
    pub async fn drive(self: Arc<Self>, stop: CancellationToken) {
        loop {
            let wait = if self.needs_certificate() {
                match self.issue().await {
                    Ok(()) => CHECK_INTERVAL,
                    Err(e) => {
                        tracing::error!(domain = %self.domain, error = %e, "Certificate issuance failed");
                        RETRY_INTERVAL
                    }
                }
            } else {
                CHECK_INTERVAL
            };

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::debug!(domain = %self.domain, "Stopped certificate renewal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    fn self_signed(domain: &str) -> (String, String) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![domain.to_string()]).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn test_only_configured_domain_is_allowed() {
        let resolver = SingleDomainResolver::new("example.com");

        assert!(resolver.allows(Some("example.com")));
        assert!(resolver.allows(Some("EXAMPLE.com")));
        assert!(!resolver.allows(Some("evil.example.com")));
        assert!(!resolver.allows(Some("other.org")));
        assert!(!resolver.allows(None));
    }

    #[test]
    fn test_certificate_paths() {
        let paths = CertificatePaths::for_domain(Path::new("/var/cache/gatehouse"), "example.com");
        assert_eq!(
            paths.cert_path,
            PathBuf::from("/var/cache/gatehouse/certs/example.com/cert.pem")
        );
        assert_eq!(
            paths.key_path,
            PathBuf::from("/var/cache/gatehouse/certs/example.com/key.pem")
        );
        assert_eq!(
            paths.account_path,
            PathBuf::from("/var/cache/gatehouse/account.json")
        );
    }

    #[tokio::test]
    async fn test_challenge_store() {
        let store = ChallengeStore::default();

        store.insert("token-1", "token-1.thumbprint").await;
        assert_eq!(store.get("token-1").await.as_deref(), Some("token-1.thumbprint"));

        store.remove("token-1").await;
        assert_eq!(store.get("token-1").await, None);
    }

    #[tokio::test]
    async fn test_challenge_router_answers_before_fallback() {
        let store = Arc::new(ChallengeStore::default());
        store.insert("abc", "abc.key").await;
        let fallback = Router::new().fallback(|| async { StatusCode::MOVED_PERMANENTLY });
        let app = challenge_router(store, fallback);

        let response = app
            .clone()
            .oneshot(
                Request::get("/.well-known/acme-challenge/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abc.key");

        let response = app
            .clone()
            .oneshot(
                Request::get("/.well-known/acme-challenge/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::get("/docs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[test]
    fn test_fresh_cache_needs_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            CertificateManager::new(dir.path().to_str().unwrap(), "example.com", None, true)
                .unwrap();

        assert!(manager.needs_certificate());
        assert!(manager.resolver().certificate().is_none());
    }

    #[test]
    fn test_cached_certificate_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertificatePaths::for_domain(dir.path(), "example.com");
        std::fs::create_dir_all(paths.cert_path.parent().unwrap()).unwrap();
        let (cert_pem, key_pem) = self_signed("example.com");
        std::fs::write(&paths.cert_path, cert_pem).unwrap();
        std::fs::write(&paths.key_path, key_pem).unwrap();

        let manager = CertificateManager::new(
            dir.path().to_str().unwrap(),
            "example.com",
            Some("ops@example.com"),
            false,
        )
        .unwrap();

        assert!(manager.resolver().certificate().is_some());
        assert!(!manager.needs_certificate());
        let config = manager.server_config().unwrap();
        assert!(config.alpn_protocols.contains(&b"http/1.1".to_vec()));
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertificatePaths::for_domain(dir.path(), "example.com");
        std::fs::create_dir_all(paths.cert_path.parent().unwrap()).unwrap();
        std::fs::write(&paths.cert_path, "garbage").unwrap();
        std::fs::write(&paths.key_path, "garbage").unwrap();

        let manager =
            CertificateManager::new(dir.path().to_str().unwrap(), "example.com", None, false)
                .unwrap();
        assert!(manager.needs_certificate());
    }
}
