//! Enrollment handler backed by the certificate authority.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use warden_ca::{CaError, CertificateAuthority};
use warden_core::{EnrollmentReply, ErrorKind, RpcError};

use super::Handler;

/// Serves `ca.enroll`: args are `[subject, csr_pem]`.
///
/// Autosign-eligible requests are issued immediately and the reply carries
/// the signed certificate plus the authority certificate the client pins.
/// Everything else is queued for manual approval and answered `Pending`.
pub struct CaHandler {
    authority: CertificateAuthority,
}

impl CaHandler {
    pub const fn new(authority: CertificateAuthority) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl Handler for CaHandler {
    async fn handle(&self, args: &[Value]) -> Result<Value, RpcError> {
        let subject = str_arg(args, 0, "subject")?;
        let csr_pem = str_arg(args, 1, "csr_pem")?;

        let reply = if self.authority.autosign_eligible(subject) {
            let record = self
                .authority
                .issue(subject, csr_pem)
                .map_err(issue_error)?;
            info!(subject, serial = record.serial, "autosigned enrollment");
            EnrollmentReply::Issued {
                cert_pem: record.cert_pem,
                ca_pem: self.authority.ca_cert_pem(),
            }
        } else {
            self.authority
                .queue_pending(subject, csr_pem)
                .map_err(issue_error)?;
            EnrollmentReply::Pending
        };

        serde_json::to_value(reply)
            .map_err(|e| RpcError::new(ErrorKind::Handler, format!("encode reply: {e}")))
    }
}

fn str_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, RpcError> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| {
        RpcError::new(
            ErrorKind::BadRequest,
            format!("ca.enroll requires string argument {index} ({name})"),
        )
    })
}

fn issue_error(err: CaError) -> RpcError {
    RpcError::new(ErrorKind::Handler, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use serde_json::json;
    use warden_ca::MemoryStore;

    fn csr_for(subject: &str) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, subject);
        params.distinguished_name = dn;
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    fn handler(autosign: bool) -> (CaHandler, CertificateAuthority) {
        let authority = CertificateAuthority::open(MemoryStore::default()).unwrap();
        authority.set_autosign(autosign);
        (CaHandler::new(authority.clone()), authority)
    }

    #[tokio::test]
    async fn test_autosign_issues_immediately() {
        let (handler, authority) = handler(true);
        let value = handler
            .handle(&[json!("agent01"), json!(csr_for("agent01"))])
            .await
            .unwrap();

        let reply: EnrollmentReply = serde_json::from_value(value).unwrap();
        match reply {
            EnrollmentReply::Issued { cert_pem, ca_pem } => {
                assert!(cert_pem.contains("BEGIN CERTIFICATE"));
                assert_eq!(ca_pem, authority.ca_cert_pem());
            }
            EnrollmentReply::Pending => panic!("expected immediate issuance"),
        }
        assert!(authority.certificate_for("agent01").is_some());
    }

    #[tokio::test]
    async fn test_without_autosign_queues_pending() {
        let (handler, authority) = handler(false);
        let value = handler
            .handle(&[json!("agent01"), json!(csr_for("agent01"))])
            .await
            .unwrap();

        let reply: EnrollmentReply = serde_json::from_value(value).unwrap();
        assert_eq!(reply, EnrollmentReply::Pending);
        // No certificate until an administrative approval happens.
        assert!(authority.certificate_for("agent01").is_none());
        assert_eq!(authority.pending_subjects(), vec!["agent01".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_args_are_bad_request() {
        let (handler, _) = handler(true);
        let err = handler.handle(&[json!("agent01")]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_is_handler_error() {
        let (handler, _) = handler(true);
        handler
            .handle(&[json!("agent01"), json!(csr_for("agent01"))])
            .await
            .unwrap();
        let err = handler
            .handle(&[json!("agent01"), json!(csr_for("agent01"))])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Handler);
    }
}
