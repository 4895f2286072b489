//! TLS material and process-wide TLS setup.
//!
//! Every live TLS endpoint holds a [`TlsLease`]. The first lease installs
//! the `ring` crypto provider and starts caching the default client
//! configuration; dropping the last lease clears that cache again.
//!
//! Clients verify the server against `ca_cert` when one is configured.
//! Without one the certificate is accepted unverified and a warning is
//! logged. Servers present `cert`/`key` when configured, otherwise a
//! self-signed certificate generated at startup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use rcgen::{CertificateParams, KeyPair};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Where TLS material comes from. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM bundle of CAs the client trusts.
    pub ca_cert: Option<PathBuf>,
    /// PEM certificate chain the server presents.
    pub cert: Option<PathBuf>,
    /// PEM private key matching `cert`.
    pub key: Option<PathBuf>,
    /// Name to verify instead of the connect host.
    pub server_name: Option<String>,
}

impl TlsSettings {
    /// Client configuration for these settings.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        match &self.ca_cert {
            Some(path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certificates(path)? {
                    roots.add(cert).map_err(|e| tls_error("load", e))?;
                }
                let config = ClientConfig::builder_with_provider(provider())
                    .with_safe_default_protocol_versions()
                    .map_err(|e| tls_error("configure", e))?
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                Ok(Arc::new(config))
            }
            None => default_client_config(),
        }
    }

    /// Server configuration for these settings.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TransportError> {
        let (chain, key) = match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => (load_certificates(cert)?, load_private_key(key)?),
            (None, None) => self_signed()?,
            _ => {
                return Err(TransportError::Tls {
                    op: "configure",
                    message: "`cert` and `key` must be configured together".into(),
                });
            }
        };
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_error("configure", e))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| tls_error("configure", e))?;
        Ok(Arc::new(config))
    }

    /// The name the client verifies the server certificate against.
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>, TransportError> {
        let name = self.server_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_owned()).map_err(|e| TransportError::Tls {
            op: "connect",
            message: format!("invalid server name `{name}`: {e}"),
        })
    }
}

// ── TlsLease ─────────────────────────────────────────────────────

struct LeaseState {
    count: usize,
    default_client: Option<Arc<ClientConfig>>,
}

static LEASES: Mutex<LeaseState> = Mutex::new(LeaseState {
    count: 0,
    default_client: None,
});

static PROVIDER: Once = Once::new();

/// Keeps process-wide TLS state alive while a TLS endpoint exists.
#[derive(Debug)]
pub struct TlsLease {
    _private: (),
}

impl TlsLease {
    pub fn acquire() -> Self {
        PROVIDER.call_once(|| {
            // Err means another provider is already the process default.
            if rustls::crypto::ring::default_provider()
                .install_default()
                .is_err()
            {
                debug!("crypto provider already installed");
            }
        });
        let mut state = LEASES.lock();
        state.count += 1;
        debug!(leases = state.count, "TLS lease acquired");
        Self { _private: () }
    }
}

impl Drop for TlsLease {
    fn drop(&mut self) {
        let mut state = LEASES.lock();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            state.default_client = None;
            debug!("last TLS lease released");
        }
    }
}

/// Number of live [`TlsLease`]s.
pub fn active_leases() -> usize {
    LEASES.lock().count
}

fn provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

fn default_client_config() -> Result<Arc<ClientConfig>, TransportError> {
    let mut state = LEASES.lock();
    if let Some(config) = &state.default_client {
        return Ok(config.clone());
    }
    warn!("no CA configured, server certificates will not be verified");
    let provider = provider();
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error("configure", e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(UnverifiedServer(provider)))
        .with_no_client_auth();
    let config = Arc::new(config);
    if state.count > 0 {
        state.default_client = Some(config.clone());
    }
    Ok(config)
}

// ── Certificate material ─────────────────────────────────────────

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = read_pem(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error("load", e))?;
    if certs.is_empty() {
        return Err(TransportError::Tls {
            op: "load",
            message: format!("no certificates in {}", path.display()),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let pem = read_pem(path)?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|e| tls_error("load", e))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|e| TransportError::Tls {
        op: "load",
        message: format!("cannot read {}: {e}", path.display()),
    })
}

/// A fresh self-signed certificate for `localhost`.
fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
    let params =
        CertificateParams::new(vec!["localhost".to_string()]).map_err(|e| tls_error("generate", e))?;
    let key_pair = KeyPair::generate().map_err(|e| tls_error("generate", e))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| tls_error("generate", e))?;
    debug!("generated self-signed server certificate");
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((vec![cert.der().clone()], key))
}

fn tls_error(op: &'static str, e: impl std::fmt::Display) -> TransportError {
    TransportError::Tls {
        op,
        message: e.to_string(),
    }
}

// ── UnverifiedServer ─────────────────────────────────────────────

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct UnverifiedServer(Arc<CryptoProvider>);

impl ServerCertVerifier for UnverifiedServer {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_server_config_builds() {
        let _lease = TlsLease::acquire();
        assert!(TlsSettings::default().server_config().is_ok());
    }

    #[test]
    fn unverified_client_config_builds() {
        let _lease = TlsLease::acquire();
        let a = TlsSettings::default().client_config().unwrap();
        let b = TlsSettings::default().client_config().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let settings = TlsSettings {
            cert: Some("server.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.server_config(),
            Err(TransportError::Tls { op: "configure", .. })
        ));
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let settings = TlsSettings {
            ca_cert: Some("/nonexistent/relaygl-ca.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.client_config(),
            Err(TransportError::Tls { op: "load", .. })
        ));
    }

    #[test]
    fn server_name_override() {
        let settings = TlsSettings {
            server_name: Some("render.example".into()),
            ..Default::default()
        };
        let name = settings.server_name("10.0.0.5").unwrap();
        assert_eq!(name.to_str(), "render.example");
        assert!(TlsSettings::default().server_name("127.0.0.1").is_ok());
    }
}
