//! warden-server: the certificate-authenticated RPC master.
//!
//! A server terminates TLS with its own host certificate (self-issued via
//! the integrated [`warden_ca::CertificateAuthority`] on first use),
//! requires connecting clients to present a certificate chaining to that
//! authority, re-checks revocation on every connection, and dispatches
//! authenticated requests to a fixed registry of named handlers.
//!
//! # Lifecycle
//!
//! `Constructed → Started → Running → ShuttingDown → Stopped`
//!
//! [`Server::start`] blocks its caller for the server's entire running
//! lifetime; shutdown is driven by an explicit [`lifecycle::ShutdownChannel`]
//! rather than OS signals, and the liveness pidfile is removed exactly once
//! on the way out so external supervisors can observe a clean stop.

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod server;
pub mod tls;

// Re-exports for convenience.
pub use config::{HandlerSpec, ServerConfig};
pub use error::ServerError;
pub use lifecycle::{Pidfile, ShutdownChannel, ShutdownSignal};
pub use server::{Server, ServerState};

/// Result type for warden-server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
