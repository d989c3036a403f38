//! Full-stack exchanges: a real server on a loopback port, real TLS, a
//! real authority, and the public client API driving them.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use warden_ca::{CertificateAuthority, MemoryStore};
use warden_client::{Client, ClientError};
use warden_core::ErrorKind;
use warden_server::{HandlerSpec, Server, ServerConfig, ShutdownChannel};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct RunningServer {
    port: u16,
    shutdown: ShutdownChannel,
    task: JoinHandle<warden_server::Result<()>>,
    _dir: TempDir,
}

impl RunningServer {
    /// Start a server on a fresh port and wait until its pidfile reports
    /// it live.
    async fn start(authority: CertificateAuthority, autosign: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let port = free_port();
        let pidfile = dir.path().join("warden.pid");
        let config = ServerConfig {
            listen: format!("127.0.0.1:{port}").parse().unwrap(),
            handlers: vec![HandlerSpec::Ca { autosign }, HandlerSpec::Status],
            pidfile: pidfile.clone(),
            ..ServerConfig::default()
        };

        let server = Arc::new(Server::new(config, authority).unwrap());
        let (shutdown, signal) = ShutdownChannel::new();
        let task = tokio::spawn(async move { server.start(signal).await });

        for _ in 0..200 {
            if pidfile.exists() {
                return Self {
                    port,
                    shutdown,
                    task,
                    _dir: dir,
                };
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server never wrote its pidfile");
    }

    async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_enroll_then_status_succeeds() {
    let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
    let server = RunningServer::start(authority, true).await;

    let mut client = Client::new("127.0.0.1", server.port);
    client.enroll("agent-alpha").await.unwrap();
    assert!(client.identity().is_some());

    assert_eq!(client.status().await.unwrap(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_enroll_is_idempotent() {
    let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
    let server = RunningServer::start(authority, true).await;

    let mut client = Client::new("127.0.0.1", server.port);
    client.enroll("agent-beta").await.unwrap();
    let first = client.identity().unwrap().clone();

    // Second enroll is a no-op, not a duplicate-subject failure.
    client.enroll("agent-beta").await.unwrap();
    assert_eq!(client.identity(), Some(&first));

    server.stop().await;
}

#[tokio::test]
async fn test_revoked_client_is_rejected_across_restart() {
    let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
    let server = RunningServer::start(authority.clone(), true).await;

    let mut client = Client::new("127.0.0.1", server.port);
    client.enroll("agent-gamma").await.unwrap();
    assert_eq!(client.status().await.unwrap(), 1);

    server.stop().await;

    let record = authority.certificate_for("agent-gamma").unwrap();
    authority.revoke(record.serial).unwrap();

    // Same authority, fresh server, same client identity: still refused.
    let server = RunningServer::start(authority, false).await;
    let client = Client::with_identity(
        "127.0.0.1",
        server.port,
        client.identity().unwrap().clone(),
    );

    let err = client.status().await.unwrap_err();
    assert!(
        matches!(err, ClientError::AuthenticationRejected(_)),
        "expected authentication rejection, got {err}"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_manual_signing_defers_enrollment() {
    let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
    let server = RunningServer::start(authority.clone(), false).await;

    let mut client = Client::new("127.0.0.1", server.port);
    let err = client.enroll("agent-delta").await.unwrap_err();
    assert!(matches!(err, ClientError::EnrollmentPending));

    // No certificate exists until the operator approves.
    assert!(client.identity().is_none());
    assert!(authority.certificate_for("agent-delta").is_none());
    assert_eq!(authority.pending_subjects(), vec!["agent-delta".to_string()]);

    let record = authority.sign_pending("agent-delta").unwrap();
    assert!(!authority.is_revoked(record.serial));
    assert!(authority.certificate_for("agent-delta").is_some());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_operation_is_reported_as_such() {
    let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
    let server = RunningServer::start(authority, true).await;

    let mut client = Client::new("127.0.0.1", server.port);
    client.enroll("agent-epsilon").await.unwrap();

    let err = client.call("catalog", Vec::new()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rpc {
            kind: ErrorKind::UnknownOperation,
            ..
        }
    ));

    server.stop().await;
}

#[tokio::test]
async fn test_certless_peer_cannot_reach_status() {
    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::{CertificateDer, ServerName};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
    let ca_pem = authority.ca_cert_pem();
    let server = RunningServer::start(authority, true).await;

    // Hand-rolled certless connection: trusts the authority but presents
    // no client certificate. Only `ca.enroll` should be reachable.
    let mut roots = rustls::RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(ca_pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let tls = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    );

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", server.port))
        .await
        .unwrap();
    let connector = tokio_rustls::TlsConnector::from(tls);
    let name = ServerName::try_from("127.0.0.1".to_string()).unwrap();
    let mut tls_stream = connector.connect(name, stream).await.unwrap();

    tls_stream
        .write_all(b"{\"operation\":\"status\"}\n")
        .await
        .unwrap();
    tls_stream.flush().await.unwrap();

    let mut line = String::new();
    BufReader::new(tls_stream).read_line(&mut line).await.unwrap();
    assert!(line.contains("authentication_rejected"), "got: {line}");

    server.stop().await;
}
