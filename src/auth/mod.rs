//! Credential verification for HTTP Basic authentication.
//!
//! A credential's hash scheme is chosen by the textual prefix of its hash:
//! `$apr1$` selects Apache MD5-crypt, anything else is handed to bcrypt.
//! A credential with an empty username lets every request through.

pub mod apr1;

use crate::config::Credential;

/// A stored password hash that could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("malformed apr1 hash: {0}")]
    Malformed(String),
    #[error("bcrypt: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// Hash scheme of a configured password hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Apr1,
    Bcrypt,
}

impl HashScheme {
    pub fn detect(hash: &str) -> Self {
        if hash.starts_with(apr1::APR1_PREFIX) {
            HashScheme::Apr1
        } else {
            HashScheme::Bcrypt
        }
    }
}

/// Checks a password against a hash string under its detected scheme.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, HashError> {
    match HashScheme::detect(hash) {
        HashScheme::Apr1 => apr1::verify(password, hash),
        HashScheme::Bcrypt => Ok(bcrypt::verify(password, hash)?),
    }
}

/// Returns whether the submitted pair is accepted by one credential.
///
/// Malformed hashes are logged and count as a rejection.
pub fn verify(username: &str, password: &str, credential: &Credential) -> bool {
    if credential.allows_all() {
        return true;
    }
    if username != credential.username {
        return false;
    }

    match verify_password(password, &credential.password_hash) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!(
                username = %credential.username,
                error = %e,
                "Failed to verify password against the configured hash"
            );
            false
        }
    }
}

/// Outcome of checking a Basic credential pair against a route's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted,
    Rejected(&'static str),
}

/// The credentials a route accepts. Any one of them grants access.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    credentials: Vec<Credential>,
}

impl RouteGuard {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    /// True when no credential demands a username, so the guard can be skipped.
    pub fn allows_all(&self) -> bool {
        self.credentials.iter().all(Credential::allows_all)
    }

    /// Checks the pair against every credential in order, stopping at the first match.
    ///
    /// bcrypt verification is slow; call this off the async executor.
    pub fn authenticate(&self, username: &str, password: &str) -> Verdict {
        if self
            .credentials
            .iter()
            .any(|credential| verify(username, password, credential))
        {
            return Verdict::Granted;
        }

        if self.credentials.iter().any(|c| c.username == username) {
            Verdict::Rejected("wrong password")
        } else {
            Verdict::Rejected("unknown user")
        }
    }
}
