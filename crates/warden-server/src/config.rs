//! Server configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for a warden RPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP listen address (default: 127.0.0.1:4433).
    pub listen: SocketAddr,

    /// Handlers to register. Must include [`HandlerSpec::Status`]; must
    /// include [`HandlerSpec::Ca`] for a fresh server to bootstrap its own
    /// host certificate.
    pub handlers: Vec<HandlerSpec>,

    /// Subject name on the server's host certificate.
    #[serde(default = "default_certname")]
    pub certname: String,

    /// Liveness pidfile: present between start and clean shutdown.
    pub pidfile: PathBuf,

    /// Directory where the host certificate and key are persisted.
    /// `None` means ephemeral: a host certificate is issued per run.
    #[serde(default)]
    pub identity_dir: Option<PathBuf>,

    /// How long to wait for in-flight connections at shutdown (seconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Per-connection budget for handshake plus one exchange (seconds).
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

/// The statically known handler kinds, each with its own typed
/// configuration. Unknown handler names are unrepresentable; they fail
/// at config parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Health probe: `status` returns `1`.
    Status,
    /// Enrollment endpoint backed by the certificate authority.
    Ca {
        /// Sign enrollment requests without manual approval.
        #[serde(default)]
        autosign: bool,
    },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4433".parse().expect("valid default addr"),
            handlers: vec![HandlerSpec::Status],
            certname: default_certname(),
            pidfile: PathBuf::from("warden.pid"),
            identity_dir: None,
            shutdown_grace_secs: default_shutdown_grace(),
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file, falling back to defaults if absent.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| crate::ServerError::Config(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Whether a CA-capable handler is configured.
    pub fn has_ca_handler(&self) -> bool {
        self.handlers
            .iter()
            .any(|h| matches!(h, HandlerSpec::Ca { .. }))
    }

    /// The autosign flag on the CA handler, if one is configured.
    pub fn autosign(&self) -> Option<bool> {
        self.handlers.iter().find_map(|h| match h {
            HandlerSpec::Ca { autosign } => Some(*autosign),
            HandlerSpec::Status => None,
        })
    }
}

// Default value functions for serde.
fn default_certname() -> String {
    String::from("warden-master")
}

const fn default_shutdown_grace() -> u64 {
    5
}

const fn default_connection_timeout() -> u64 {
    30
}
