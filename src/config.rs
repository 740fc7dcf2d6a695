//! Configuration loading, validation and constants.
//!
//! The gateway is configured from a single JSON file. Every field defaults to
//! empty, and an empty string means "not set", so files written for older
//! releases keep loading unchanged. `GatewayConfig::validate` enforces the
//! cross-field rules (TLS mode exclusivity, required addresses, auth
//! references) before anything is built from the configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// =============================================================================
// Listener Timeouts
// =============================================================================

/// Header-read, full-read and idle timeout applied to every listener
pub const LISTENER_TIMEOUT: Duration = Duration::from_secs(60);

/// Time in-flight requests are given to complete once shutdown starts
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

// =============================================================================
// Authentication
// =============================================================================

/// Realm announced in the `WWW-Authenticate` challenge
pub const AUTH_REALM: &str = "Restricted";

/// bcrypt cost used by the `gatehouse-hash` utility
pub const PASSWORD_HASH_COST: u32 = 14;

// =============================================================================
// Logging
// =============================================================================

/// Default log filter when neither `--log-level` nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "gatehouse=info,tower_http=info";

/// Log filter used with `--quiet`: only errors get through
pub const QUIET_LOG_FILTER: &str = "error";

/// Tracing target of the per-request access records
pub const ACCESS_LOG_TARGET: &str = "gatehouse::access";

/// A named (username, password hash) pair that routes reference by identifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credential {
    /// User name to authenticate. Empty means no authentication.
    #[serde(default)]
    pub username: String,
    /// `$apr1$` MD5-crypt or bcrypt hash of the password
    #[serde(default)]
    pub password_hash: String,
}

impl Credential {
    /// True for the "allow everybody" sentinel (empty username).
    pub fn allows_all(&self) -> bool {
        self.username.is_empty()
    }
}

/// One route of the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Route {
    /// Path pattern; a trailing `/` makes it match the whole subtree
    pub prefix: String,
    /// Absolute directory to serve, or absolute URL to forward to
    pub target: String,
    /// Identifiers into `GatewayConfig::auths`
    #[serde(default, rename = "auths")]
    pub auth_ids: Vec<String>,
}

/// Root configuration, as read from the JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub auths: HashMap<String, Credential>,
    /// Domain to request certificates for (automatic TLS only)
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub ssl_key_path: String,
    #[serde(default)]
    pub ssl_cert_path: String,
    /// Certificate cache directory; setting it enables automatic TLS
    #[serde(default)]
    pub letsencrypt_dir: String,
    /// Contact address registered with the ACME account
    #[serde(default)]
    pub letsencrypt_email: Option<String>,
    /// Use the Let's Encrypt staging directory instead of production
    #[serde(default)]
    pub letsencrypt_staging: bool,
    #[serde(default)]
    pub http_address: String,
    #[serde(default)]
    pub https_address: String,
}

/// How the encrypted endpoint is provisioned. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain HTTP only
    Plain,
    /// Certificate and key loaded from PEM files
    Static { cert_path: String, key_path: String },
    /// Certificates issued on demand over ACME and cached on disk
    Automatic { cache_dir: String, domain: String },
}

impl TlsMode {
    pub fn is_tls(&self) -> bool {
        !matches!(self, TlsMode::Plain)
    }
}

impl GatewayConfig {
    /// Reads, parses and validates the configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parses and validates a configuration from JSON text.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_prefixes = std::collections::HashSet::new();
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(ConfigError::InvalidPrefix(route.prefix.clone()));
            }
            if !seen_prefixes.insert(route.prefix.as_str()) {
                return Err(ConfigError::DuplicatePrefix(route.prefix.clone()));
            }
            for auth_id in &route.auth_ids {
                if !self.auths.contains_key(auth_id) {
                    return Err(ConfigError::UnknownAuth {
                        prefix: route.prefix.clone(),
                        auth_id: auth_id.clone(),
                    });
                }
            }
        }

        if self.ssl_cert_path.is_empty() != self.ssl_key_path.is_empty() {
            return Err(ConfigError::Validation(format!(
                "either both SSL cert and key are empty, or none: {:?} and {:?}",
                self.ssl_cert_path, self.ssl_key_path
            )));
        }

        if !self.letsencrypt_dir.is_empty() && !self.ssl_cert_path.is_empty() {
            return Err(ConfigError::Validation(format!(
                "both letsencrypt_dir and ssl_cert_path were specified: {:?} and {:?}",
                self.letsencrypt_dir, self.ssl_cert_path
            )));
        }

        if !self.letsencrypt_dir.is_empty() && self.domain.is_empty() {
            return Err(ConfigError::Validation(format!(
                "letsencrypt_dir was specified, but no domain: {:?}",
                self.letsencrypt_dir
            )));
        }

        let uses_tls = !self.ssl_cert_path.is_empty() || !self.letsencrypt_dir.is_empty();
        if uses_tls && self.https_address.is_empty() {
            return Err(ConfigError::Validation(
                "TLS is configured, but https_address was not specified".to_string(),
            ));
        }

        if self.http_address.is_empty() {
            return Err(ConfigError::Validation(
                "http_address was not specified".to_string(),
            ));
        }

        Ok(())
    }

    /// Selects the TLS mode. Assumes a validated configuration.
    pub fn tls_mode(&self) -> TlsMode {
        if !self.ssl_cert_path.is_empty() {
            TlsMode::Static {
                cert_path: self.ssl_cert_path.clone(),
                key_path: self.ssl_key_path.clone(),
            }
        } else if !self.letsencrypt_dir.is_empty() {
            TlsMode::Automatic {
                cache_dir: self.letsencrypt_dir.clone(),
                domain: self.domain.clone(),
            }
        } else {
            TlsMode::Plain
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Auth {auth_id:?} referenced by the route with prefix {prefix} is not defined in auths")]
    UnknownAuth { prefix: String, auth_id: String },
    #[error("Route prefix must start with '/': {0:?}")]
    InvalidPrefix(String),
    #[error("Route prefix is configured more than once: {0:?}")]
    DuplicatePrefix(String),
    #[error("Does not know how to handle the route target: {0:?}")]
    UnrecognizedTarget(String),
    #[error("Failed to set up TLS: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GatewayConfig {
        GatewayConfig {
            http_address: ":8080".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parses_original_file_format() {
        let config = GatewayConfig::from_json(
            r#"{
              "domain": "",
              "ssl_key_path": "",
              "letsencrypt_dir": "",
              "https_address": "",
              "http_address": ":8080",
              "ssl_cert_path": "",
              "routes": [{"prefix": "/o/", "target": "/srv/www", "auths": ["anonymous"]}],
              "auths": {"anonymous": {"username": "", "password_hash": ""}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].auth_ids, vec!["anonymous"]);
        assert!(config.auths["anonymous"].allows_all());
        assert_eq!(config.tls_mode(), TlsMode::Plain);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let config = GatewayConfig::from_json(r#"{"http_address": "127.0.0.1:80"}"#).unwrap();
        assert!(config.routes.is_empty());
        assert!(config.auths.is_empty());
        assert!(!config.letsencrypt_staging);
    }

    #[test]
    fn test_unknown_auth_is_rejected() {
        let mut config = base();
        config.routes.push(Route {
            prefix: "/".to_string(),
            target: "/srv".to_string(),
            auth_ids: vec!["ghost".to_string()],
        });

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAuth { ref auth_id, .. } if auth_id == "ghost"));
    }

    #[test]
    fn test_http_address_is_required() {
        let config = GatewayConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_cert_and_key_must_come_together() {
        let mut config = base();
        config.https_address = ":443".to_string();
        config.ssl_cert_path = "/etc/cert.pem".to_string();
        assert!(config.validate().is_err());

        config.ssl_key_path = "/etc/key.pem".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.tls_mode(),
            TlsMode::Static {
                cert_path: "/etc/cert.pem".to_string(),
                key_path: "/etc/key.pem".to_string(),
            }
        );
    }

    #[test]
    fn test_tls_requires_https_address() {
        let mut config = base();
        config.ssl_cert_path = "/etc/cert.pem".to_string();
        config.ssl_key_path = "/etc/key.pem".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_automatic_tls_requires_domain() {
        let mut config = base();
        config.https_address = ":443".to_string();
        config.letsencrypt_dir = "/var/cache/certs".to_string();
        assert!(config.validate().is_err());

        config.domain = "example.com".to_string();
        assert!(config.validate().is_ok());
        assert!(config.tls_mode().is_tls());
    }

    #[test]
    fn test_static_and_automatic_tls_are_exclusive() {
        let mut config = base();
        config.https_address = ":443".to_string();
        config.domain = "example.com".to_string();
        config.letsencrypt_dir = "/var/cache/certs".to_string();
        config.ssl_cert_path = "/etc/cert.pem".to_string();
        config.ssl_key_path = "/etc/key.pem".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefix_rules() {
        let mut config = base();
        config.routes.push(Route {
            prefix: "pub/".to_string(),
            target: "/srv".to_string(),
            auth_ids: vec![],
        });
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPrefix(_))));

        config.routes[0].prefix = "/pub/".to_string();
        config.routes.push(config.routes[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::DuplicatePrefix(_))));
    }
}
