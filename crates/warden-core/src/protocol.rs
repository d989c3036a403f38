//! Request/response framing for the warden RPC protocol.
//!
//! Framing is newline-delimited JSON: the client writes one `Request` line,
//! the server writes one `Response` line, and the connection is done.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single RPC request: an operation name plus a JSON argument list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Operation name, e.g. `status` or `ca.enroll`.
    pub operation: String,

    /// Positional arguments; interpretation is up to the handler.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            args,
        }
    }
}

/// A single RPC response: a result value or a kinded error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { result: Value },
    Error { error: RpcError },
}

impl Response {
    pub const fn ok(result: Value) -> Self {
        Self::Ok { result }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error: RpcError {
                kind,
                message: message.into(),
            },
        }
    }
}

/// Error payload carried in an error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Machine-matchable error kinds surfaced across the wire.
///
/// Clients must be able to distinguish an authentication rejection from a
/// generic failure, so this is a closed enum rather than free-form text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No handler is registered for the requested operation.
    UnknownOperation,
    /// The peer's certificate was missing, invalid, or revoked.
    AuthenticationRejected,
    /// Enrollment was queued for manual approval; retry later.
    EnrollmentPending,
    /// The request itself was malformed (bad args, bad JSON shape).
    BadRequest,
    /// The handler ran and failed.
    Handler,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UnknownOperation => "unknown_operation",
            Self::AuthenticationRejected => "authentication_rejected",
            Self::EnrollmentPending => "enrollment_pending",
            Self::BadRequest => "bad_request",
            Self::Handler => "handler",
        };
        f.write_str(name)
    }
}

/// Reply payload of the `ca.enroll` operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EnrollmentReply {
    /// The authority signed the request immediately (autosign).
    ///
    /// Carries the issued certificate and the CA certificate the client
    /// should pin as its trust anchor for all subsequent calls.
    Issued { cert_pem: String, ca_pem: String },
    /// The request was queued for manual approval.
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let req = Request::new("ca.enroll", vec![json!("alice"), json!("-----BEGIN...")]);
        let line = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_request_args_default_to_empty() {
        let parsed: Request = serde_json::from_str(r#"{"operation":"status"}"#).unwrap();
        assert_eq!(parsed.operation, "status");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn test_response_ok_shape() {
        let line = serde_json::to_string(&Response::ok(json!(1))).unwrap();
        assert_eq!(line, r#"{"status":"ok","result":1}"#);
    }

    #[test]
    fn test_response_error_kind_survives_roundtrip() {
        let resp = Response::error(ErrorKind::AuthenticationRejected, "certificate revoked");
        let line = serde_json::to_string(&resp).unwrap();
        assert!(line.contains("authentication_rejected"));

        let parsed: Response = serde_json::from_str(&line).unwrap();
        match parsed {
            Response::Error { error } => {
                assert_eq!(error.kind, ErrorKind::AuthenticationRejected);
                assert_eq!(error.message, "certificate revoked");
            }
            Response::Ok { .. } => panic!("expected error response"),
        }
    }

    #[test]
    fn test_enrollment_reply_tagging() {
        let pending = serde_json::to_value(EnrollmentReply::Pending).unwrap();
        assert_eq!(pending, json!({"state": "pending"}));

        let issued = EnrollmentReply::Issued {
            cert_pem: "CERT".into(),
            ca_pem: "CA".into(),
        };
        let value = serde_json::to_value(&issued).unwrap();
        assert_eq!(value["state"], "issued");
        let back: EnrollmentReply = serde_json::from_value(value).unwrap();
        assert_eq!(back, issued);
    }

    #[test]
    fn test_error_kind_display_matches_wire_name() {
        for kind in [
            ErrorKind::UnknownOperation,
            ErrorKind::AuthenticationRejected,
            ErrorKind::EnrollmentPending,
            ErrorKind::BadRequest,
            ErrorKind::Handler,
        ] {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, json!(kind.to_string()));
        }
    }
}
