//! Server bootstrap, the accept loop, and per-connection trust enforcement.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use warden_ca::{CertificateAuthority, TrustStore};
use warden_core::{ErrorKind, Request, Response};

use crate::config::ServerConfig;
use crate::handler::HandlerRegistry;
use crate::lifecycle::{Pidfile, ShutdownSignal};
use crate::{tls, Result, ServerError};

/// Lifecycle states, in order. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Constructed = 0,
    Started = 1,
    Running = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl ServerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Started,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            4 => Self::Stopped,
            _ => Self::Constructed,
        }
    }
}

/// The server's own TLS identity.
struct HostIdentity {
    cert_pem: String,
    key_pem: String,
}

impl HostIdentity {
    fn load(dir: &Path) -> Result<Option<Self>> {
        let cert_path = dir.join("host_cert.pem");
        let key_path = dir.join("host_key.pem");
        if !cert_path.exists() || !key_path.exists() {
            return Ok(None);
        }
        Ok(Some(Self {
            cert_pem: std::fs::read_to_string(cert_path)?,
            key_pem: std::fs::read_to_string(key_path)?,
        }))
    }

    fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("host_cert.pem"), &self.cert_pem)?;
        std::fs::write(dir.join("host_key.pem"), &self.key_pem)?;
        Ok(())
    }
}

/// The certificate-authenticated RPC server.
pub struct Server {
    config: ServerConfig,
    authority: CertificateAuthority,
    registry: Arc<HandlerRegistry>,
    identity: HostIdentity,
    tls: Arc<rustls::ServerConfig>,
    state: AtomicU8,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Construct a server, enforcing the host-certificate contract: a
    /// usable server must hold one. It is loaded from `identity_dir` when
    /// persisted there, self-issued through the authority when a CA
    /// handler is configured, and otherwise construction fails — an
    /// unusable server is never returned.
    pub fn new(config: ServerConfig, authority: CertificateAuthority) -> Result<Self> {
        let registry = HandlerRegistry::from_specs(&config.handlers, &authority)?;

        let persisted = match &config.identity_dir {
            Some(dir) => HostIdentity::load(dir)?,
            None => None,
        };

        let identity = match persisted {
            Some(identity) => {
                debug!(certname = %config.certname, "loaded persisted host certificate");
                identity
            }
            None if config.has_ca_handler() => {
                let san_names = vec![
                    config.certname.clone(),
                    "localhost".to_string(),
                    "127.0.0.1".to_string(),
                ];
                let issued = authority.issue_server_cert(&config.certname, &san_names)?;
                let identity = HostIdentity {
                    cert_pem: issued.record.cert_pem,
                    key_pem: issued.key_pem,
                };
                if let Some(dir) = &config.identity_dir {
                    identity.persist(dir)?;
                }
                info!(
                    certname = %config.certname,
                    serial = issued.record.serial,
                    "self-issued host certificate"
                );
                identity
            }
            None => {
                return Err(ServerError::Config(
                    "no host certificate available and none can be generated \
                     (no ca handler configured)"
                        .into(),
                ))
            }
        };

        let tls = tls::server_tls_config(
            &identity.cert_pem,
            &identity.key_pem,
            &authority.ca_cert_pem(),
        )?;

        Ok(Self {
            config,
            authority,
            registry: Arc::new(registry),
            identity,
            tls,
            state: AtomicU8::new(ServerState::Constructed as u8),
        })
    }

    /// The host certificate, PEM-encoded. Non-empty for any constructed
    /// server.
    pub fn cert_pem(&self) -> &str {
        &self.identity.cert_pem
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Bind, write the liveness pidfile, and serve connections until the
    /// shutdown signal fires. Blocks its caller for the server's entire
    /// running lifetime; run it on a dedicated task.
    ///
    /// A server starts at most once. Lifecycle transitions only move
    /// forward, so calling `start` again, including after a clean stop,
    /// fails without touching the listener or the pidfile.
    ///
    /// On shutdown: stop accepting, drain in-flight connections for the
    /// configured grace period (aborting stragglers), remove the pidfile
    /// exactly once, and return.
    pub async fn start(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        let claimed = self.state.compare_exchange(
            ServerState::Constructed as u8,
            ServerState::Started as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if claimed.is_err() {
            return Err(ServerError::Config(format!(
                "start called in state {:?}; a server starts at most once",
                self.state()
            )));
        }

        let listener = TcpListener::bind(self.config.listen).await?;

        let pidfile = Pidfile::create(&self.config.pidfile)?;
        let acceptor = TlsAcceptor::from(Arc::clone(&self.tls));
        let connection_timeout = Duration::from_secs(self.config.connection_timeout_secs);

        self.set_state(ServerState::Running);
        info!(addr = %self.config.listen, certname = %self.config.certname, "server running");

        let mut connections: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        self.spawn_connection(
                            &mut connections,
                            acceptor.clone(),
                            stream,
                            peer_addr,
                            connection_timeout,
                        );
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
            // Reap connections that already finished.
            while connections.try_join_next().is_some() {}
        }

        self.set_state(ServerState::ShuttingDown);
        info!("shutting down; draining in-flight connections");
        drop(listener);

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "grace period elapsed; aborting connections");
            connections.abort_all();
        }

        pidfile.remove()?;
        self.set_state(ServerState::Stopped);
        info!("server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        connections: &mut JoinSet<()>,
        acceptor: TlsAcceptor,
        stream: TcpStream,
        peer_addr: SocketAddr,
        timeout: Duration,
    ) {
        let registry = Arc::clone(&self.registry);
        let trust = self.authority.trust_store();

        connections.spawn(async move {
            let served = tokio::time::timeout(
                timeout,
                serve_connection(acceptor, stream, peer_addr, registry, trust),
            )
            .await;
            match served {
                Ok(Ok(())) => {}
                // Per-connection failures never affect other connections.
                Ok(Err(e)) => debug!(%peer_addr, error = %e, "connection closed with error"),
                Err(_) => debug!(%peer_addr, "connection timed out"),
            }
        });
    }
}

/// Serve one request/response exchange over a fresh TLS connection.
///
/// The trust gate runs after the handshake and before any dispatch: a
/// revoked peer certificate, or a missing one on an operation that needs
/// authentication, is answered with `authentication_rejected` and no
/// handler ever runs.
async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<HandlerRegistry>,
    trust: TrustStore,
) -> Result<()> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| ServerError::Tls(format!("handshake with {peer_addr}: {e}")))?;

    let peer = {
        let (_, connection) = tls_stream.get_ref();
        connection
            .peer_certificates()
            .and_then(tls::peer_identity)
    };

    let (read_half, mut write_half) = tokio::io::split(tls_stream);
    let mut lines = BufReader::new(read_half).lines();

    let Some(line) = lines.next_line().await? else {
        // Peer connected and hung up without a request.
        return Ok(());
    };

    let request: Request = match serde_json::from_str(&line) {
        Ok(request) => request,
        Err(e) => {
            let response = Response::error(ErrorKind::BadRequest, format!("bad request: {e}"));
            return write_response(&mut write_half, &response).await;
        }
    };

    // A revoked certificate is refused outright, whatever the operation.
    if let Some(peer) = &peer {
        if trust.is_revoked(peer.serial) {
            info!(
                %peer_addr,
                subject = %peer.subject,
                serial = peer.serial,
                operation = %request.operation,
                "refused connection: certificate revoked"
            );
            let response =
                Response::error(ErrorKind::AuthenticationRejected, "certificate revoked");
            return write_response(&mut write_half, &response).await;
        }
    }

    if registry.requires_auth(&request.operation) && peer.is_none() {
        info!(
            %peer_addr,
            operation = %request.operation,
            "refused connection: no client certificate"
        );
        let response = Response::error(
            ErrorKind::AuthenticationRejected,
            "no client certificate presented",
        );
        return write_response(&mut write_half, &response).await;
    }

    let response = match registry.dispatch(&request.operation, &request.args).await {
        Ok(result) => Response::ok(result),
        Err(error) => Response::Error { error },
    };
    write_response(&mut write_half, &response).await
}

async fn write_response<W: AsyncWriteExt + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.shutdown().await?;
    Ok(())
}
