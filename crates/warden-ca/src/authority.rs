//! The certificate authority: issuance, autosign policy, revocation.
//!
//! All state lives behind a single `RwLock` so a `revoke` is visible to the
//! next `is_revoked` with no stale window; the store is written while the
//! lock is held so persisted state can never run ahead of (or behind) the
//! in-memory view.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Duration, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::store::{CaIndex, CaStore, PersistedCa};
use crate::trust::TrustStore;
use crate::{CaError, CertificateRecord, Result, Validity};

/// Common name on the authority's own certificate.
const AUTHORITY_NAME: &str = "warden-ca";

/// The authority's signing material. `cert_pem` is the canonical anchor as
/// first written to the store; it is distributed to clients verbatim and
/// never regenerated once it exists.
struct Signer {
    key: KeyPair,
    key_pem: String,
    cert: Certificate,
    cert_pem: String,
}

pub(crate) struct AuthorityState {
    signer: Signer,
    pub(crate) index: CaIndex,
    autosign: bool,
}

/// A host (server) certificate together with its private key.
///
/// The authority records the certificate but never retains the key; it is
/// returned to the caller exactly once.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub record: CertificateRecord,
    pub key_pem: String,
}

/// Handle to the authority. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CertificateAuthority {
    inner: Arc<RwLock<AuthorityState>>,
    store: Arc<dyn CaStore>,
}

impl CertificateAuthority {
    /// Open the authority against a store, creating the signing key/cert
    /// pair if the store is empty. Idempotent: a second open against the
    /// same store reuses the existing pair.
    pub fn open(store: impl CaStore) -> Result<Self> {
        let store: Arc<dyn CaStore> = Arc::new(store);

        let state = match store.load()? {
            Some(persisted) => {
                let signer = Signer::from_persisted(&persisted)?;
                debug!(
                    certs = persisted.index.certs.len(),
                    "reopened certificate authority"
                );
                AuthorityState {
                    signer,
                    index: persisted.index,
                    autosign: false,
                }
            }
            None => {
                let signer = Signer::generate()?;
                let state = AuthorityState {
                    signer,
                    index: CaIndex::default(),
                    autosign: false,
                };
                store.save(&state.to_persisted())?;
                info!("created certificate authority signing pair");
                state
            }
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(state)),
            store,
        })
    }

    /// The authority certificate in PEM form, the trust anchor clients pin.
    pub fn ca_cert_pem(&self) -> String {
        self.read().signer.cert_pem.clone()
    }

    /// Enable or disable autosigning of enrollment requests.
    pub fn set_autosign(&self, autosign: bool) {
        self.write().autosign = autosign;
    }

    /// Whether an enrollment request for `subject` would be signed without
    /// manual approval. Policy is currently a single flag; the subject is
    /// accepted so finer-grained policies can slot in without an API break.
    pub fn autosign_eligible(&self, _subject: &str) -> bool {
        self.read().autosign
    }

    /// Issue a client certificate for `subject` from a CSR.
    ///
    /// Fails with [`CaError::DuplicateSubject`] if the subject already
    /// holds a live certificate; callers choosing to renew must revoke
    /// first.
    pub fn issue(&self, subject: &str, csr_pem: &str) -> Result<CertificateRecord> {
        let mut state = self.write();
        if let Some(live) = state.live_record(subject) {
            return Err(CaError::DuplicateSubject {
                subject: live.subject.clone(),
            });
        }

        let record = state.sign_csr(subject, csr_pem)?;
        self.store.save(&state.to_persisted())?;
        info!(
            serial = record.serial,
            subject = %record.subject,
            fingerprint = %record.fingerprint,
            "issued client certificate"
        );
        Ok(record)
    }

    /// Issue a host certificate for the server itself, generating the
    /// keypair locally. A previous live host certificate for the same
    /// subject is revoked first (renewal), so the one-live-cert-per-subject
    /// invariant holds.
    pub fn issue_server_cert(&self, subject: &str, san_names: &[String]) -> Result<ServerIdentity> {
        let mut state = self.write();

        if let Some(previous) = state.live_record(subject).map(|r| r.serial) {
            state.mark_revoked(previous)?;
            info!(serial = previous, subject, "revoked superseded host certificate");
        }

        let key = KeyPair::generate()?;
        let key_pem = key.serialize_pem();

        let mut params = CertificateParams::new(san_names.to_vec())?;
        params.distinguished_name = common_name(subject);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let serial = state.index.next_serial;
        state.index.next_serial += 1;
        params.serial_number = Some(serial.into());
        apply_validity(&mut params, Validity::Host);

        let cert = params.signed_by(&key, &state.signer.cert, &state.signer.key)?;
        let record = state.record_issued(serial, subject, cert.pem(), Validity::Host)?;

        self.store.save(&state.to_persisted())?;
        info!(
            serial = record.serial,
            subject = %record.subject,
            fingerprint = %record.fingerprint,
            "issued host certificate"
        );
        Ok(ServerIdentity { record, key_pem })
    }

    /// Revoke a serial. No-op `Ok` if already revoked; fails with
    /// [`CaError::UnknownSerial`] if this authority never issued it.
    pub fn revoke(&self, serial: u64) -> Result<()> {
        let mut state = self.write();
        if state.mark_revoked(serial)? {
            self.store.save(&state.to_persisted())?;
            info!(serial, "revoked certificate");
        } else {
            debug!(serial, "serial already revoked");
        }
        Ok(())
    }

    /// Whether a serial has been revoked. Safe to call concurrently with
    /// `revoke`; a completed revoke is always visible here.
    pub fn is_revoked(&self, serial: u64) -> bool {
        self.read()
            .index
            .certs
            .iter()
            .any(|c| c.serial == serial && c.revoked)
    }

    /// The most recently issued certificate for `subject`, if any.
    /// Used by revocation-by-name flows and diagnostics.
    pub fn certificate_for(&self, subject: &str) -> Option<CertificateRecord> {
        self.read()
            .index
            .certs
            .iter()
            .rev()
            .find(|c| c.subject == subject)
            .cloned()
    }

    /// Queue an enrollment request for manual approval.
    pub fn queue_pending(&self, subject: &str, csr_pem: &str) -> Result<()> {
        let mut state = self.write();
        state
            .index
            .pending
            .insert(subject.to_string(), csr_pem.to_string());
        self.store.save(&state.to_persisted())?;
        info!(subject, "queued enrollment request for approval");
        Ok(())
    }

    /// Subjects with a queued enrollment request.
    pub fn pending_subjects(&self) -> Vec<String> {
        self.read().index.pending.keys().cloned().collect()
    }

    /// Administratively approve a queued enrollment request, issuing the
    /// certificate from the CSR submitted at enqueue time.
    pub fn sign_pending(&self, subject: &str) -> Result<CertificateRecord> {
        let mut state = self.write();
        let csr_pem =
            state
                .index
                .pending
                .remove(subject)
                .ok_or_else(|| CaError::NoPendingRequest {
                    subject: subject.to_string(),
                })?;

        if let Some(live) = state.live_record(subject) {
            return Err(CaError::DuplicateSubject {
                subject: live.subject.clone(),
            });
        }

        let record = state.sign_csr(subject, &csr_pem)?;
        self.store.save(&state.to_persisted())?;
        info!(
            serial = record.serial,
            subject = %record.subject,
            "approved pending enrollment"
        );
        Ok(record)
    }

    /// A read-only handle over the revocation state, consulted per
    /// connection by the server.
    pub fn trust_store(&self) -> TrustStore {
        TrustStore::new(Arc::clone(&self.inner))
    }

    fn read(&self) -> RwLockReadGuard<'_, AuthorityState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AuthorityState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuthorityState {
    pub(crate) fn is_revoked(&self, serial: u64) -> bool {
        self.index
            .certs
            .iter()
            .any(|c| c.serial == serial && c.revoked)
    }

    fn live_record(&self, subject: &str) -> Option<&CertificateRecord> {
        self.index
            .certs
            .iter()
            .rev()
            .find(|c| c.subject == subject && !c.revoked)
    }

    /// Returns `Ok(true)` if the serial transitioned to revoked here,
    /// `Ok(false)` if it already was.
    fn mark_revoked(&mut self, serial: u64) -> Result<bool> {
        let record = self
            .index
            .certs
            .iter_mut()
            .find(|c| c.serial == serial)
            .ok_or(CaError::UnknownSerial { serial })?;
        if record.revoked {
            return Ok(false);
        }
        record.revoked = true;
        Ok(true)
    }

    /// Sign a CSR for a client certificate. Serial allocation and record
    /// keeping happen here; duplicate-subject policy is the caller's.
    fn sign_csr(&mut self, subject: &str, csr_pem: &str) -> Result<CertificateRecord> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)?;
        csr.params.distinguished_name = common_name(subject);
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let serial = self.index.next_serial;
        self.index.next_serial += 1;
        csr.params.serial_number = Some(serial.into());
        apply_validity(&mut csr.params, Validity::Client);

        let cert = csr.signed_by(&self.signer.cert, &self.signer.key)?;
        self.record_issued(serial, subject, cert.pem(), Validity::Client)
    }

    fn record_issued(
        &mut self,
        serial: u64,
        subject: &str,
        cert_pem: String,
        validity: Validity,
    ) -> Result<CertificateRecord> {
        let now = Utc::now();
        let record = CertificateRecord {
            serial,
            subject: subject.to_string(),
            issuer: AUTHORITY_NAME.to_string(),
            fingerprint: fingerprint_pem(&cert_pem)?,
            cert_pem,
            not_before: now,
            not_after: now + Duration::days(i64::from(validity.days())),
            revoked: false,
        };
        self.index.certs.push(record.clone());
        Ok(record)
    }

    fn to_persisted(&self) -> PersistedCa {
        PersistedCa {
            key_pem: self.signer.key_pem.clone(),
            cert_pem: self.signer.cert_pem.clone(),
            index: self.index.clone(),
        }
    }
}

impl Signer {
    fn generate() -> Result<Self> {
        let key = KeyPair::generate()?;
        let key_pem = key.serialize_pem();

        let mut params = CertificateParams::default();
        params.distinguished_name = common_name(AUTHORITY_NAME);
        // Signs end-entity certificates only.
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        apply_validity(&mut params, Validity::Authority);

        let cert = params.self_signed(&key)?;
        let cert_pem = cert.pem();

        Ok(Self {
            key,
            key_pem,
            cert,
            cert_pem,
        })
    }

    /// Rebuild the signer from persisted PEM. The persisted `cert_pem`
    /// stays canonical; the rcgen handle rebuilt here is only used as the
    /// issuer when signing, which depends on the (unchanged) key and
    /// distinguished name.
    fn from_persisted(persisted: &PersistedCa) -> Result<Self> {
        let key = KeyPair::from_pem(&persisted.key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(&persisted.cert_pem)?;
        let cert = params.self_signed(&key)?;
        Ok(Self {
            key,
            key_pem: persisted.key_pem.clone(),
            cert,
            cert_pem: persisted.cert_pem.clone(),
        })
    }
}

fn common_name(name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    dn
}

fn apply_validity(params: &mut CertificateParams, validity: Validity) {
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after =
        time::OffsetDateTime::now_utc() + time::Duration::days(i64::from(validity.days()));
}

/// SHA-256 fingerprint of a PEM certificate, colon-separated hex.
fn fingerprint_pem(cert_pem: &str) -> Result<String> {
    let der = CertificateDer::from_pem_slice(cert_pem.as_bytes())
        .map_err(|e| CaError::Pem(e.to_string()))?;
    let hash = Sha256::digest(der.as_ref());
    Ok(hash
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":"))
}
