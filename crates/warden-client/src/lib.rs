//! warden-client: RPC client for a certificate-authenticated warden master.
//!
//! A fresh client holds no certificate. [`Client::enroll`] bootstraps one
//! from the master's CA handler: it generates a keypair and CSR, submits
//! them over a trust-on-first-use connection, and pins the authority
//! certificate returned alongside the issued one. Every subsequent
//! [`Client::call`] is mutually authenticated against that pinned anchor.
//!
//! Authentication failures are a distinct error kind
//! ([`ClientError::AuthenticationRejected`]) because callers react to them
//! differently than to transport noise: a rejected identity means
//! re-enroll, not retry.

mod client;
mod error;
mod identity;
mod verify;

pub use client::Client;
pub use error::ClientError;
pub use identity::Identity;

/// Result type for warden-client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
