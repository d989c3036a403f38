//! The client's enrolled identity: certificate, key, and pinned authority.

use std::path::Path;

use tracing::debug;

use crate::Result;

/// Certificate material a client holds after enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// This client's certificate, PEM-encoded.
    pub cert_pem: String,
    /// This client's private key, PEM-encoded PKCS#8.
    pub key_pem: String,
    /// The authority certificate pinned at enrollment; the trust anchor
    /// for every subsequent server verification.
    pub ca_pem: String,
}

impl Identity {
    /// Load a previously saved identity, or `None` if the directory holds
    /// no complete one.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let cert_path = dir.join("client_cert.pem");
        let key_path = dir.join("client_key.pem");
        let ca_path = dir.join("ca_cert.pem");
        if !cert_path.exists() || !key_path.exists() || !ca_path.exists() {
            return Ok(None);
        }
        debug!(dir = %dir.display(), "loaded client identity");
        Ok(Some(Self {
            cert_pem: std::fs::read_to_string(cert_path)?,
            key_pem: std::fs::read_to_string(key_path)?,
            ca_pem: std::fs::read_to_string(ca_path)?,
        }))
    }

    /// Persist the identity for reuse across process restarts.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("client_cert.pem"), &self.cert_pem)?;
        std::fs::write(dir.join("client_key.pem"), &self.key_pem)?;
        std::fs::write(dir.join("ca_cert.pem"), &self.ca_pem)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_empty_dir_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Identity::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let identity = Identity {
            cert_pem: "CERT".into(),
            key_pem: "KEY".into(),
            ca_pem: "CA".into(),
        };
        identity.save(dir.path()).unwrap();

        let loaded = Identity::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, identity);
    }

    #[test]
    fn test_partial_material_is_none() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("client_cert.pem"), "CERT").unwrap();
        assert!(Identity::load(dir.path()).unwrap().is_none());
    }
}
