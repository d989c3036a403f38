//! The RPC client: enrollment bootstrap and mutually-authenticated calls.

use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use warden_core::{EnrollmentReply, Request, Response};

use crate::error::ClientError;
use crate::identity::Identity;
use crate::verify::TofuServerVerifier;
use crate::Result;

/// Client for a warden master.
///
/// One connection per call: connect, handshake, write one request line,
/// read one response line, done.
pub struct Client {
    host: String,
    port: u16,
    identity: Option<Identity>,
}

impl Client {
    /// A client with no certificate; it can only enroll.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        install_crypto_provider();
        Self {
            host: host.into(),
            port,
            identity: None,
        }
    }

    /// A client resuming a previously enrolled identity.
    pub fn with_identity(host: impl Into<String>, port: u16, identity: Identity) -> Self {
        install_crypto_provider();
        Self {
            host: host.into(),
            port,
            identity: Some(identity),
        }
    }

    /// The enrolled identity, if any. Callers persist this to survive
    /// restarts.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Obtain a certificate from the master's CA handler.
    ///
    /// Generates a fresh key pair and certificate signing request, submits
    /// them over a trust-on-first-use connection, and on issuance pins the
    /// authority certificate returned in the reply. Idempotent: an already
    /// enrolled client returns `Ok` without touching the network.
    ///
    /// Returns [`ClientError::EnrollmentPending`] when the authority queued
    /// the request for manual approval; retry after it is signed.
    pub async fn enroll(&mut self, subject: &str) -> Result<()> {
        if self.identity.is_some() {
            debug!(subject, "already enrolled");
            return Ok(());
        }

        let key = KeyPair::generate()?;
        let key_pem = key.serialize_pem();
        let csr_pem = csr_pem(subject, &key)?;

        let tls = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(TofuServerVerifier::new()))
            .with_no_client_auth();

        let request = Request::new("ca.enroll", vec![json!(subject), json!(csr_pem)]);
        let result = self.exchange(Arc::new(tls), &request).await?;

        match serde_json::from_value::<EnrollmentReply>(result)? {
            EnrollmentReply::Issued { cert_pem, ca_pem } => {
                info!(subject, "enrolled; authority certificate pinned");
                self.identity = Some(Identity {
                    cert_pem,
                    key_pem,
                    ca_pem,
                });
                Ok(())
            }
            EnrollmentReply::Pending => Err(ClientError::EnrollmentPending),
        }
    }

    /// Invoke an operation on the master over mutual TLS.
    ///
    /// Requires an enrolled identity. A revoked or otherwise rejected
    /// certificate surfaces as [`ClientError::AuthenticationRejected`],
    /// whether the rejection arrives as a handshake alert or as an error
    /// response from the dispatch layer.
    pub async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value> {
        let identity = self.identity.as_ref().ok_or(ClientError::NotEnrolled)?;
        let tls = mutual_tls_config(identity)?;
        let request = Request::new(operation, args);
        self.exchange(tls, &request).await
    }

    /// The built-in liveness probe; a healthy master answers `1`.
    pub async fn status(&self) -> Result<i64> {
        let value = self.call("status", Vec::new()).await?;
        value
            .as_i64()
            .ok_or_else(|| ClientError::Protocol(format!("status returned non-integer: {value}")))
    }

    async fn exchange(&self, tls: Arc<ClientConfig>, request: &Request) -> Result<Value> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| ClientError::Protocol(format!("invalid server name: {e}")))?;

        let connector = TlsConnector::from(tls);
        let mut tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(ClientError::from_tls_io)?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        tls_stream
            .write_all(&line)
            .await
            .map_err(ClientError::from_tls_io)?;
        tls_stream.flush().await.map_err(ClientError::from_tls_io)?;

        let mut reader = BufReader::new(tls_stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .await
            .map_err(ClientError::from_tls_io)?;
        if read == 0 {
            return Err(ClientError::Protocol(
                "connection closed before a response arrived".into(),
            ));
        }

        match serde_json::from_str::<Response>(&response_line)? {
            Response::Ok { result } => Ok(result),
            Response::Error { error } => Err(ClientError::from_rpc(error.kind, error.message)),
        }
    }
}

/// TLS config for authenticated calls: server verified against the pinned
/// authority, our certificate presented for client auth.
fn mutual_tls_config(identity: &Identity) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(identity.ca_pem.as_bytes()) {
        let cert = cert.map_err(|e| ClientError::Identity(format!("bad pinned authority: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Identity(format!("bad pinned authority: {e}")))?;
    }

    let certs = CertificateDer::pem_slice_iter(identity.cert_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Identity(format!("bad client certificate: {e}")))?;
    let key = PrivateKeyDer::from_pem_slice(identity.key_pem.as_bytes())
        .map_err(|e| ClientError::Identity(format!("bad client key: {e}")))?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| ClientError::Identity(format!("client auth setup failed: {e}")))?;
    Ok(Arc::new(config))
}

fn csr_pem(subject: &str, key: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::new(Vec::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject);
    params.distinguished_name = dn;
    Ok(params.serialize_request(key)?.pem()?)
}

fn install_crypto_provider() {
    // Racing installs are fine; the second one loses harmlessly.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_has_no_identity() {
        let client = Client::new("localhost", 4433);
        assert!(client.identity().is_none());
    }

    #[test]
    fn test_with_identity_exposes_it() {
        let identity = Identity {
            cert_pem: "CERT".into(),
            key_pem: "KEY".into(),
            ca_pem: "CA".into(),
        };
        let client = Client::with_identity("localhost", 4433, identity.clone());
        assert_eq!(client.identity(), Some(&identity));
    }

    #[tokio::test]
    async fn test_call_without_identity_is_not_enrolled() {
        let client = Client::new("localhost", 4433);
        let err = client.call("status", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotEnrolled));
    }

    #[test]
    fn test_csr_generation_produces_pem() {
        let key = KeyPair::generate().unwrap();
        let pem = csr_pem("agent-1", &key).unwrap();
        assert!(pem.contains("CERTIFICATE REQUEST"));
    }
}
