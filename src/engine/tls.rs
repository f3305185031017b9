//! TLS client configuration for TCP engine endpoints.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use super::endpoint::TlsMaterial;
use crate::error::EngineError;

/// Builds a TLS connector from the endpoint's certificate material.
///
/// Public web roots are trusted when no CA bundle is supplied. A client
/// certificate is only presented when both the chain and the key are set.
pub(crate) fn build_connector(
    material: &TlsMaterial,
    endpoint: &str,
) -> Result<TlsConnector, EngineError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = root_store(material, endpoint)?;

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|error| invalid(endpoint, format!("unsupported TLS versions: {error}")))?
        .with_root_certificates(roots);

    let mut config = match (&material.client_cert, &material.client_key) {
        (Some(cert_path), Some(key_path)) => {
            let chain = parse_certificates(&read_pem(cert_path, endpoint)?, cert_path, endpoint)?;
            let key = PrivateKeyDer::from_pem_slice(&read_pem(key_path, endpoint)?)
                .map_err(|error| invalid(endpoint, format!("bad private key {key_path}: {error}")))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|error| invalid(endpoint, format!("client certificate rejected: {error}")))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(invalid(
                endpoint,
                String::from("client certificate and key must be supplied together"),
            ));
        }
    };

    if material.skip_verify {
        tracing::warn!(endpoint, "TLS server certificate verification is disabled");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

fn root_store(material: &TlsMaterial, endpoint: &str) -> Result<RootCertStore, EngineError> {
    let mut roots = RootCertStore::empty();
    let Some(ca_path) = material.ca_cert.as_ref() else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let certificates = parse_certificates(&read_pem(ca_path, endpoint)?, ca_path, endpoint)?;
    let (added, _ignored) = roots.add_parsable_certificates(certificates);
    if added == 0 {
        return Err(invalid(
            endpoint,
            format!("no usable CA certificates in {ca_path}"),
        ));
    }
    Ok(roots)
}

fn parse_certificates(
    pem: &[u8],
    path: &Utf8Path,
    endpoint: &str,
) -> Result<Vec<CertificateDer<'static>>, EngineError> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| invalid(endpoint, format!("bad certificate {path}: {error}")))?;
    if certificates.is_empty() {
        return Err(invalid(endpoint, format!("no certificates found in {path}")));
    }
    Ok(certificates)
}

/// Reads a PEM file through a capability handle on its parent directory.
fn read_pem(path: &Utf8Path, endpoint: &str) -> Result<Vec<u8>, EngineError> {
    let current_dir = Utf8PathBuf::from(".");
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| current_dir.as_path());
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|error| invalid(endpoint, format!("failed to open {parent}: {error}")))?;
    dir.read(file_name)
        .map_err(|error| invalid(endpoint, format!("failed to read {path}: {error}")))
}

fn invalid(endpoint: &str, reason: String) -> EngineError {
    EngineError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        reason,
    }
}

/// Verifier installed when server certificate checks are disabled.
///
/// Handshake signatures are still checked so the peer must hold the key for
/// the certificate it presents.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
