//! Error types for the warden RPC server.

use thiserror::Error;

/// Errors that can occur in warden-server operations.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration is invalid; fatal to the construction call that hit
    /// it, so an unusable server is never returned.
    #[error("config error: {0}")]
    Config(String),

    /// TLS setup or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Certificate authority operation failed.
    #[error("certificate authority error: {0}")]
    Ca(#[from] warden_ca::CaError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
