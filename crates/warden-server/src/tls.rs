//! TLS termination for the server side.
//!
//! The server presents its host certificate and verifies client
//! certificates against the authority's root. Verification is split in
//! two: chain validity is enforced by rustls during the handshake, while
//! revocation is checked afterwards against the live
//! [`warden_ca::TrustStore`] so a revoked certificate is refused on its
//! very next connection.
//!
//! The verifier allows unauthenticated peers through the handshake; the
//! dispatch gate in [`crate::server`] then refuses them for every
//! operation except enrollment. That is the bootstrap path for clients
//! that do not have a certificate yet.

use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{Result, ServerError};

/// What the handshake learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Serial number from the peer certificate.
    pub serial: u64,
    /// Subject common name, for logging.
    pub subject: String,
}

/// Parse every certificate out of a PEM bundle.
pub fn certs_from_pem(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("bad certificate pem: {e}")))?;
    if certs.is_empty() {
        return Err(ServerError::Tls("no certificates in pem".into()));
    }
    Ok(certs)
}

/// Parse a private key out of PEM.
pub fn key_from_pem(pem: &str) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem.as_bytes())
        .map_err(|e| ServerError::Tls(format!("bad private key pem: {e}")))
}

/// Build the rustls server config: host certificate as the TLS identity,
/// client certificates verified against the authority root when presented.
pub fn server_tls_config(
    host_cert_pem: &str,
    host_key_pem: &str,
    ca_cert_pem: &str,
) -> Result<Arc<rustls::ServerConfig>> {
    // Idempotent; required once per process by rustls 0.23+.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut roots = RootCertStore::empty();
    for cert in certs_from_pem(ca_cert_pem)? {
        roots
            .add(cert)
            .map_err(|e| ServerError::Tls(format!("bad authority certificate: {e}")))?;
    }

    // Unauthenticated peers pass the handshake and are gated at dispatch;
    // peers that do present a certificate must chain to the authority.
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .allow_unauthenticated()
        .build()
        .map_err(|e| ServerError::Tls(format!("client verifier: {e}")))?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs_from_pem(host_cert_pem)?, key_from_pem(host_key_pem)?)
        .map_err(|e| ServerError::Tls(format!("server config: {e}")))?;

    debug!("built server tls config");
    Ok(Arc::new(config))
}

/// Extract serial and subject from the peer's leaf certificate.
///
/// Returns `None` for anonymous peers or unparseable certificates; the
/// caller treats both as unauthenticated.
pub fn peer_identity(certs: &[CertificateDer<'_>]) -> Option<PeerIdentity> {
    let leaf = certs.first()?;
    let (_, cert) = X509Certificate::from_der(leaf.as_ref()).ok()?;

    let raw = cert.raw_serial();
    let raw = &raw[raw.len().saturating_sub(8)..];
    let serial = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

    let subject = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("<unknown>")
        .to_string();

    Some(PeerIdentity { serial, subject })
}
