//! Pluggable persistence for authority state.
//!
//! The authority itself is storage-agnostic: it hands a [`PersistedCa`] to a
//! [`CaStore`] after every mutation and loads one back at open. `FileStore`
//! is what a real master uses; `MemoryStore` keeps tests and ephemeral
//! servers off the filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CaError, CertificateRecord, Result};

/// Everything the authority persists: its signing key/cert pair plus the
/// issued-certificate index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCa {
    /// Authority private key, PEM-encoded PKCS#8.
    pub key_pem: String,
    /// Authority certificate, PEM-encoded. This is the canonical trust
    /// anchor distributed to clients; it is never regenerated once written.
    pub cert_pem: String,
    /// Issued certificates, revocations and the pending queue.
    pub index: CaIndex,
}

/// The authority's bookkeeping: every issued certificate (which doubles as
/// the revocation set via the per-record flag) and queued enrollments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaIndex {
    /// Next serial to allocate. Serials start at 1 and only grow.
    pub next_serial: u64,
    /// All certificates ever issued, in issuance order.
    #[serde(default)]
    pub certs: Vec<CertificateRecord>,
    /// Pending enrollment requests awaiting manual approval, keyed by
    /// subject; the value is the submitted CSR PEM.
    #[serde(default)]
    pub pending: BTreeMap<String, String>,
}

impl Default for CaIndex {
    fn default() -> Self {
        Self {
            next_serial: 1,
            certs: Vec::new(),
            pending: BTreeMap::new(),
        }
    }
}

/// Backing store for authority state.
///
/// An unwritable store is fatal to the operation that hits it; the
/// authority never continues with state it could not persist.
pub trait CaStore: Send + Sync + 'static {
    /// Load previously persisted state, or `None` on first use.
    fn load(&self) -> Result<Option<PersistedCa>>;

    /// Persist the full authority state.
    fn save(&self, state: &PersistedCa) -> Result<()>;
}

/// In-memory store for tests and ephemeral masters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedCa>>,
}

impl CaStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedCa>> {
        let guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn save(&self, state: &PersistedCa) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(state.clone());
        Ok(())
    }
}

/// File-backed store: `ca_key.pem`, `ca_cert.pem` and `index.json` under a
/// state directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self) -> PathBuf {
        self.dir.join("ca_key.pem")
    }

    fn cert_path(&self) -> PathBuf {
        self.dir.join("ca_cert.pem")
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }
}

impl CaStore for FileStore {
    fn load(&self) -> Result<Option<PersistedCa>> {
        if !self.cert_path().exists() {
            return Ok(None);
        }

        let key_pem = std::fs::read_to_string(self.key_path())?;
        let cert_pem = std::fs::read_to_string(self.cert_path())?;
        let index_raw = std::fs::read_to_string(self.index_path()).map_err(|e| {
            CaError::Store(format!(
                "authority certificate present but index unreadable: {e}"
            ))
        })?;
        let index: CaIndex = serde_json::from_str(&index_raw)?;

        debug!(dir = %self.dir.display(), certs = index.certs.len(), "loaded authority state");
        Ok(Some(PersistedCa {
            key_pem,
            cert_pem,
            index,
        }))
    }

    fn save(&self, state: &PersistedCa) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        std::fs::write(self.key_path(), &state.key_pem)?;
        restrict_permissions(&self.key_path());
        std::fs::write(self.cert_path(), &state.cert_pem)?;

        let index_json = serde_json::to_string_pretty(&state.index)?;
        std::fs::write(self.index_path(), index_json)?;
        Ok(())
    }
}

/// Best-effort 0600 on the authority key file.
#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(path, perms) {
        tracing::warn!(path = %path.display(), error = %e, "could not restrict key file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
