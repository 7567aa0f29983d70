//! Certificate Provider collaborator
//!
//! Builds the TLS configurations the HTTP engine needs: a reusable
//! `rustls::ClientConfig` for dialing the upstream leg (optionally insecure
//! or with mutual-TLS client credentials) and a `rustls::ServerConfig` for
//! terminating inbound HTTPS. Certificate *generation* is out of scope;
//! certificates arrive as PEM files on disk.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, ServerConfig,
    SignatureScheme,
};

use crate::error::TlsError;

/// Options for the upstream-leg client TLS configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientTlsOptions {
    /// Skip upstream certificate verification.
    pub insecure: bool,
    /// Client certificate for mutual TLS (PEM path).
    pub client_cert: Option<String>,
    /// Client private key for mutual TLS (PEM path).
    pub client_key: Option<String>,
    /// CA bundle to verify the upstream against in mutual-TLS mode (PEM
    /// path); replaces the default root store.
    pub client_ca: Option<String>,
}

impl ClientTlsOptions {
    fn mutual_tls(&self) -> Option<(&str, &str, &str)> {
        match (&self.client_cert, &self.client_key, &self.client_ca) {
            (Some(cert), Some(key), Some(ca)) => Some((cert, key, ca)),
            _ => None,
        }
    }
}

/// Supplies TLS client configurations for dialing upstreams.
pub trait CertificateProvider: Send + Sync {
    /// Build a client TLS configuration honouring the given options.
    ///
    /// # Errors
    ///
    /// Returns `TlsError` if certificate material cannot be loaded or the
    /// assembled configuration is rejected.
    fn client_config(&self, opts: &ClientTlsOptions) -> Result<ClientConfig, TlsError>;
}

/// Default provider: Mozilla roots via webpki, PEM files for everything
/// custom.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCertificateProvider;

impl CertificateProvider for DefaultCertificateProvider {
    fn client_config(&self, opts: &ClientTlsOptions) -> Result<ClientConfig, TlsError> {
        init_crypto();

        let builder = ClientConfig::builder();

        let config = match (opts.insecure, opts.mutual_tls()) {
            (true, None) => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
                .with_no_client_auth(),
            (true, Some((cert, key, _ca))) => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
                .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
                .map_err(|e| TlsError::Config(e.to_string()))?,
            (false, None) => builder
                .with_root_certificates(webpki_root_store())
                .with_no_client_auth(),
            (false, Some((cert, key, ca))) => {
                let mut roots = RootCertStore::empty();
                for cert_der in load_certs(ca)? {
                    roots
                        .add(cert_der)
                        .map_err(|e| TlsError::Config(e.to_string()))?;
                }
                builder
                    .with_root_certificates(roots)
                    .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
                    .map_err(|e| TlsError::Config(e.to_string()))?
            }
        };

        Ok(config)
    }
}

/// Build a server TLS configuration for terminating inbound HTTPS.
///
/// # Errors
///
/// Returns `TlsError` if the certificate chain or key cannot be loaded.
pub fn build_server_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, TlsError> {
    init_crypto();

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))
}

/// Install the ring crypto provider exactly once.
pub fn init_crypto() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn webpki_root_store() -> RootCertStore {
    RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(Path::new(path)).map_err(|e| TlsError::Certificate {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Certificate {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(TlsError::Certificate {
            path: path.to_string(),
            reason: "no certificates found in file".into(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(Path::new(path)).map_err(|e| TlsError::PrivateKey {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::PrivateKey {
            path: path.to_string(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::PrivateKey {
            path: path.to_string(),
            reason: "no private key found in file".into(),
        })
}

/// Certificate verifier that accepts any upstream certificate.
///
/// Enabled only by the `insecure` proxy flag; makes the upstream leg
/// vulnerable to man-in-the-middle interception.
#[derive(Debug)]
struct InsecureServerCertVerifier;

impl ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_config() {
        let provider = DefaultCertificateProvider;
        let config = provider.client_config(&ClientTlsOptions::default());
        assert!(config.is_ok());
    }

    #[test]
    fn test_insecure_client_config() {
        let provider = DefaultCertificateProvider;
        let config = provider.client_config(&ClientTlsOptions {
            insecure: true,
            ..Default::default()
        });
        assert!(config.is_ok());
    }

    #[test]
    fn test_missing_certificate_file() {
        let result = load_certs("/nonexistent/cert.pem");
        assert!(matches!(result, Err(TlsError::Certificate { .. })));

        let result = load_private_key("/nonexistent/key.pem");
        assert!(matches!(result, Err(TlsError::PrivateKey { .. })));
    }

    #[test]
    fn test_mutual_tls_requires_full_triple() {
        let partial = ClientTlsOptions {
            client_cert: Some("cert.pem".into()),
            client_key: Some("key.pem".into()),
            client_ca: None,
            ..Default::default()
        };
        assert!(partial.mutual_tls().is_none());

        // Partial credentials fall back to plain verification, so building
        // still succeeds without touching the named files.
        let provider = DefaultCertificateProvider;
        assert!(provider.client_config(&partial).is_ok());
    }
}
