//! TLS configuration for servers and clients.
//!
//! Servers load PEM certificate material when paths are configured and
//! fall back to a freshly generated self-signed certificate otherwise.
//! Clients verify against a configured trust anchor, or accept any
//! server certificate when none is configured.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::{info, warn};

use crate::error::NetError;

/// How a TLS server treats client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuth {
    #[default]
    Disabled,
    /// Request a certificate but accept connections without one.
    Optional,
    /// Reject connections that present no valid client certificate.
    Required,
}

/// File-based TLS material. All paths optional; see module docs for the
/// fallback behavior.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub certificate_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub trust_certificate_path: Option<PathBuf>,
    pub client_auth: ClientAuth,
}

impl TlsSettings {
    /// Builds the rustls server configuration.
    pub fn server_config(&self) -> Result<ServerConfig, NetError> {
        let (certs, key) = match (&self.certificate_path, &self.private_key_path) {
            (Some(cert_path), Some(key_path)) => load_cert_and_key(cert_path, key_path)?,
            _ => {
                warn!("No certificate configured, generating a self-signed one");
                self_signed()?
            }
        };

        let builder = match self.client_auth {
            ClientAuth::Disabled => ServerConfig::builder().with_no_client_auth(),
            ClientAuth::Optional | ClientAuth::Required => {
                let Some(trust_path) = &self.trust_certificate_path else {
                    return Err(NetError::Tls(
                        "client authentication requires a trust certificate".into(),
                    ));
                };
                let roots = load_trust_store(trust_path)?;
                let verifier_builder = WebPkiClientVerifier::builder(Arc::new(roots));
                let verifier = if self.client_auth == ClientAuth::Required {
                    verifier_builder.build()
                } else {
                    verifier_builder.allow_unauthenticated().build()
                }
                .map_err(|error| NetError::Tls(error.to_string()))?;
                ServerConfig::builder().with_client_cert_verifier(verifier)
            }
        };

        builder
            .with_single_cert(certs, key)
            .map_err(|error| NetError::Tls(error.to_string()))
    }

    /// Builds the rustls client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, NetError> {
        let config = match &self.trust_certificate_path {
            Some(trust_path) => {
                let roots = load_trust_store(trust_path)?;
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            }
            None => {
                info!("No trust certificate configured, accepting any server certificate");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                    .with_no_client_auth()
            }
        };
        Ok(config)
    }
}

fn load_cert_and_key(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), NetError> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(NetError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        NetError::Tls(format!("no private key found in {}", key_path.display()))
    })?;

    info!(certificate = %cert_path.display(), "Loaded TLS certificate");
    Ok((certs, key))
}

fn load_trust_store(path: &Path) -> Result<RootCertStore, NetError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots
            .add(cert?)
            .map_err(|error| NetError::Tls(error.to_string()))?;
    }
    if roots.is_empty() {
        return Err(NetError::Tls(format!(
            "no trust anchors found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), NetError> {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|error| NetError::Tls(error.to_string()))?;
    let cert = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(generated.key_pair.serialize_der().into());
    Ok((vec![cert], key))
}

/// Trust-everything verifier used when the client has no trust anchor.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn self_signed_fallback_builds_a_server_config() {
        let settings = TlsSettings::default();
        settings.server_config().unwrap();
    }

    #[test]
    fn client_config_without_trust_store_builds() {
        let settings = TlsSettings::default();
        settings.client_config().unwrap();
    }

    #[test]
    fn pem_material_round_trips_through_config() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let cert_path = dir.path().join("cert.pem");
        File::create(&cert_path)
            .unwrap()
            .write_all(generated.cert.pem().as_bytes())
            .unwrap();
        let key_path = dir.path().join("key.pem");
        File::create(&key_path)
            .unwrap()
            .write_all(generated.key_pair.serialize_pem().as_bytes())
            .unwrap();

        let settings = TlsSettings {
            certificate_path: Some(cert_path.clone()),
            private_key_path: Some(key_path),
            trust_certificate_path: Some(cert_path),
            client_auth: ClientAuth::Disabled,
        };
        settings.server_config().unwrap();
        settings.client_config().unwrap();
    }

    #[test]
    fn required_client_auth_without_trust_store_is_rejected() {
        let settings = TlsSettings {
            client_auth: ClientAuth::Required,
            ..TlsSettings::default()
        };
        assert!(settings.server_config().is_err());
    }
}
