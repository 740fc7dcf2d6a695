//! rustls server configuration for both TLS modes.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use super::server::ServerError;

const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn alpn_protocols() -> Vec<Vec<u8>> {
    ALPN_PROTOCOLS.iter().map(|protocol| protocol.to_vec()).collect()
}

/// Parses a PEM certificate chain and private key.
pub fn parse_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::TlsConfig(format!("Invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig("No certificate found".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::TlsConfig(format!("Invalid private key PEM: {}", e)))?
        .ok_or_else(|| ServerError::TlsConfig("No private key found".to_string()))?;

    Ok((certs, key))
}

/// Builds a signing certificate from PEM text, for certificate resolvers.
pub fn certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, ServerError> {
    let (certs, key) = parse_pem(cert_pem, key_pem)?;
    let signing_key = provider()
        .key_provider
        .load_private_key(key)
        .map_err(|e| ServerError::TlsConfig(format!("Unsupported private key: {}", e)))?;
    Ok(CertifiedKey::new(certs, signing_key))
}

/// Server configuration for a certificate and key read from disk.
pub async fn pem_file_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    let cert_pem = tokio::fs::read(cert_path).await.map_err(|e| {
        ServerError::TlsConfig(format!("Failed to read certificate {}: {}", cert_path, e))
    })?;
    let key_pem = tokio::fs::read(key_path).await.map_err(|e| {
        ServerError::TlsConfig(format!("Failed to read private key {}: {}", key_path, e))
    })?;
    let (certs, key) = parse_pem(&cert_pem, &key_pem)?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::TlsConfig(format!("Failed to load certificates: {}", e)))?;
    config.alpn_protocols = alpn_protocols();
    Ok(config)
}

/// Server configuration that asks `resolver` for a certificate per handshake.
pub fn resolver_config(resolver: Arc<dyn ResolvesServerCert>) -> Result<ServerConfig, ServerError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = alpn_protocols();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (String, String) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    #[tokio::test]
    async fn test_pem_files_offer_h2_and_http11() {
        let (cert_pem, key_pem) = self_signed();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();

        let config = pem_file_config(cert_path.to_str().unwrap(), key_path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_missing_pem_files() {
        let result = pem_file_config("/nonexistent/cert.pem", "/nonexistent/key.pem").await;
        assert!(matches!(result, Err(ServerError::TlsConfig(_))));
    }

    #[test]
    fn test_certified_key_from_pem() {
        let (cert_pem, key_pem) = self_signed();
        let key = certified_key(cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();
        assert_eq!(key.cert.len(), 1);

        assert!(certified_key(b"not pem", key_pem.as_bytes()).is_err());
        assert!(certified_key(cert_pem.as_bytes(), b"").is_err());
    }
}
