//! Read path over the authority's revocation state.
//!
//! The server holds one of these per listener and consults it on every
//! inbound connection. It shares the authority's lock, so there is no
//! cache to go stale: once `revoke` returns, every subsequent
//! `is_revoked` sees it.

use std::sync::{Arc, PoisonError, RwLock};

use crate::authority::AuthorityState;

/// Cheap clonable handle exposing only the revocation lookup.
///
/// Deliberately does not expose iteration or mutation; revocation is
/// driven through [`crate::CertificateAuthority::revoke`] alone.
#[derive(Clone)]
pub struct TrustStore {
    inner: Arc<RwLock<AuthorityState>>,
}

impl TrustStore {
    pub(crate) fn new(inner: Arc<RwLock<AuthorityState>>) -> Self {
        Self { inner }
    }

    /// Whether the serial has been revoked by the authority.
    pub fn is_revoked(&self, serial: u64) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_revoked(serial)
    }
}
