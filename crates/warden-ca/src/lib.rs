//! # warden-ca
//!
//! The integrated certificate authority behind a warden master.
//!
//! ## Trust model
//!
//! ```text
//! AUTHORITY KEY/CERT (one per master, created lazily, persisted)
//!        │
//!        ├── host certificate (the server's own TLS identity)
//!        └── client certificates (one live cert per enrolled subject)
//! ```
//!
//! Every certificate the master trusts chains to this single authority.
//! Revocation is a one-way transition recorded against the serial; it is
//! consulted on *every* inbound connection, not just at enrollment, so a
//! certificate that was valid when issued is rejected on its very next
//! connection after being revoked.
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden_ca::{CertificateAuthority, MemoryStore};
//!
//! let ca = CertificateAuthority::open(MemoryStore::default())?;
//! let record = ca.issue("agent01.example.com", &csr_pem)?;
//! ca.revoke(record.serial)?;
//! assert!(ca.is_revoked(record.serial));
//! ```

mod authority;
mod error;
mod store;
mod trust;

pub use authority::{CertificateAuthority, ServerIdentity};
pub use error::CaError;
pub use store::{CaIndex, CaStore, FileStore, MemoryStore, PersistedCa};
pub use trust::TrustStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for warden-ca operations.
pub type Result<T> = std::result::Result<T, CaError>;

/// An issued certificate as tracked by the authority.
///
/// Immutable once issued, except for the one-way `revoked` transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateRecord {
    /// Serial number, unique and monotonically allocated by the authority.
    pub serial: u64,
    /// Subject common name (the principal this certificate identifies).
    pub subject: String,
    /// Issuer common name (the authority).
    pub issuer: String,
    /// The signed certificate, PEM-encoded.
    pub cert_pem: String,
    /// SHA-256 fingerprint of the DER certificate, colon-separated hex.
    pub fingerprint: String,
    /// Not valid before.
    pub not_before: DateTime<Utc>,
    /// Not valid after.
    pub not_after: DateTime<Utc>,
    /// Whether this serial has been revoked. Never cleared.
    pub revoked: bool,
}

/// Validity applied to certificates signed by the authority, in days.
#[derive(Debug, Clone, Copy)]
pub enum Validity {
    /// The authority's own certificate: 5 years.
    Authority,
    /// Host (server) certificates: 1 year.
    Host,
    /// Client certificates: 1 year.
    Client,
}

impl Validity {
    /// Number of days this validity period covers.
    pub const fn days(self) -> u32 {
        match self {
            Self::Authority => 5 * 365,
            Self::Host | Self::Client => 365,
        }
    }
}
