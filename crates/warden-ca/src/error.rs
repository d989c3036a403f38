//! Error types for warden-ca operations.

use thiserror::Error;

/// Errors that can occur in certificate authority operations.
#[derive(Error, Debug)]
pub enum CaError {
    /// The serial was never issued by this authority.
    #[error("unknown serial {serial}")]
    UnknownSerial { serial: u64 },

    /// The subject already holds a live (non-revoked) certificate.
    #[error("subject {subject} already has a live certificate")]
    DuplicateSubject { subject: String },

    /// No pending enrollment request exists for the subject.
    #[error("no pending enrollment request for {subject}")]
    NoPendingRequest { subject: String },

    /// Key or certificate generation/signing failed.
    #[error("certificate generation failed: {0}")]
    CertGeneration(#[from] rcgen::Error),

    /// Certificate material could not be parsed.
    #[error("malformed certificate material: {0}")]
    Pem(String),

    /// The backing store failed; fatal for the operation that hit it.
    #[error("store error: {0}")]
    Store(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
