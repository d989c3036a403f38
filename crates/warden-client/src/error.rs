//! Error types for the warden client.

use thiserror::Error;
use warden_core::ErrorKind;

/// Errors that can occur in warden-client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport or server refused this client's identity: missing,
    /// invalid, or revoked certificate. Never folded into `Transport`;
    /// callers re-enroll on this, they retry on that.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Enrollment was queued for manual approval; retry later. A deferred
    /// state, not a system failure.
    #[error("enrollment pending approval by the authority")]
    EnrollmentPending,

    /// No certificate available; call `enroll` first.
    #[error("not enrolled: no client certificate available")]
    NotEnrolled,

    /// The server answered with an error response.
    #[error("rpc error ({kind}): {message}")]
    Rpc { kind: ErrorKind, message: String },

    /// The exchange did not follow the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Certificate or key material could not be used.
    #[error("identity error: {0}")]
    Identity(String),

    /// Key pair or CSR generation failed.
    #[error("certificate generation failed: {0}")]
    CertGeneration(#[from] rcgen::Error),

    /// Network failure unrelated to authentication.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Classify an IO error from the TLS layer: certificate trouble
    /// (local verification failure or a fatal alert from the server's
    /// verifier) becomes `AuthenticationRejected`, everything else stays
    /// `Transport`.
    pub(crate) fn from_tls_io(err: std::io::Error) -> Self {
        let certificate_problem = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .is_some_and(|e| {
                matches!(
                    e,
                    rustls::Error::InvalidCertificate(_) | rustls::Error::AlertReceived(_)
                )
            });
        if certificate_problem {
            Self::AuthenticationRejected(err.to_string())
        } else {
            Self::Transport(err)
        }
    }

    /// Map a wire error response onto the client taxonomy.
    pub(crate) fn from_rpc(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::AuthenticationRejected => Self::AuthenticationRejected(message),
            ErrorKind::EnrollmentPending => Self::EnrollmentPending,
            _ => Self::Rpc { kind, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_auth_rejection_maps_to_dedicated_variant() {
        let err = ClientError::from_rpc(
            ErrorKind::AuthenticationRejected,
            "certificate revoked".into(),
        );
        assert!(matches!(err, ClientError::AuthenticationRejected(_)));
    }

    #[test]
    fn test_rpc_pending_maps_to_dedicated_variant() {
        let err = ClientError::from_rpc(ErrorKind::EnrollmentPending, String::new());
        assert!(matches!(err, ClientError::EnrollmentPending));
    }

    #[test]
    fn test_other_rpc_kinds_stay_generic() {
        let err = ClientError::from_rpc(ErrorKind::UnknownOperation, "nope".into());
        assert!(matches!(
            err,
            ClientError::Rpc {
                kind: ErrorKind::UnknownOperation,
                ..
            }
        ));
    }

    #[test]
    fn test_tls_io_certificate_errors_classified() {
        let inner = rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer);
        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, inner);
        assert!(matches!(
            ClientError::from_tls_io(err),
            ClientError::AuthenticationRejected(_)
        ));

        let plain = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            ClientError::from_tls_io(plain),
            ClientError::Transport(_)
        ));
    }
}
