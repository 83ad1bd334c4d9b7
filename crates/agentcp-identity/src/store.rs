//! On-disk identity store.

use std::path::{Path, PathBuf};

use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::{Signature, SigningKey};
use p384::SecretKey;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::csr::build_csr;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity not found for {0}")]
    NotFound(String),
    #[error("wrong password for private key")]
    WrongPassword,
    #[error("key error: {0}")]
    Key(String),
    #[error("csr error: {0}")]
    Csr(String),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Root of the identity tree. Every AID owns
/// `<storage>/<aid>/private/certs/<aid>.{key,crt,csr}`.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    storage_path: PathBuf,
}

/// A freshly generated key pair whose certificate has not been issued yet.
/// Hand the CSR to the CA, then call [`PendingIdentity::persist`] with the
/// returned certificate.
pub struct PendingIdentity {
    aid: String,
    key: SecretKey,
    csr_pem: String,
    store: IdentityStore,
}

/// A loaded identity: decrypted signing key plus certificate.
#[derive(Clone, Debug)]
pub struct Identity {
    aid: String,
    signing_key: SigningKey,
    cert_pem: String,
    certs_dir: PathBuf,
}

impl IdentityStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn certs_dir(&self, aid: &str) -> PathBuf {
        self.storage_path.join(aid).join("private").join("certs")
    }

    /// Generate a new P-384 key and a CSR for `aid`.
    pub fn generate(&self, aid: &str) -> Result<PendingIdentity, IdentityError> {
        let key = SecretKey::random(&mut OsRng);
        let csr_pem = build_csr(aid, &key)?;
        debug!(aid, "generated P-384 key and CSR");
        Ok(PendingIdentity {
            aid: aid.to_string(),
            key,
            csr_pem,
            store: self.clone(),
        })
    }

    /// Load an identity from disk, decrypting the key with `password`.
    pub fn load(&self, aid: &str, password: &str) -> Result<Identity, IdentityError> {
        let dir = self.certs_dir(aid);
        let key_path = dir.join(format!("{aid}.key"));
        let crt_path = dir.join(format!("{aid}.crt"));
        if !crt_path.exists() {
            return Err(IdentityError::NotFound(aid.to_string()));
        }

        let cert_pem = std::fs::read_to_string(&crt_path)?;
        let key_pem = std::fs::read_to_string(&key_path)?;
        // Decrypt failure is indistinguishable from a bad password.
        let key = SecretKey::from_pkcs8_encrypted_pem(&key_pem, password.as_bytes())
            .map_err(|_| IdentityError::WrongPassword)?;

        Ok(Identity {
            aid: aid.to_string(),
            signing_key: SigningKey::from(&key),
            cert_pem,
            certs_dir: dir,
        })
    }

    /// Whether a certificate exists on disk for `aid`.
    pub fn exists(&self, aid: &str) -> bool {
        self.certs_dir(aid).join(format!("{aid}.crt")).exists()
    }

    /// Read just the certificate PEM, without touching the key.
    pub fn read_certificate(&self, aid: &str) -> Result<String, IdentityError> {
        let crt_path = self.certs_dir(aid).join(format!("{aid}.crt"));
        if !crt_path.exists() {
            return Err(IdentityError::NotFound(aid.to_string()));
        }
        Ok(std::fs::read_to_string(crt_path)?)
    }

    /// Remove everything stored for `aid`.
    pub fn delete(&self, aid: &str) -> Result<(), IdentityError> {
        let dir = self.storage_path.join(aid);
        if dir.exists() {
            info!(aid, "removing identity directory");
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Scan the storage root for AIDs with a stored certificate.
    pub fn list(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.storage_path) else {
            return ids;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if self.exists(name) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        ids
    }
}

impl PendingIdentity {
    pub fn aid(&self) -> &str {
        &self.aid
    }

    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// Persist the encrypted key, the CA-issued certificate and the CSR,
    /// returning the ready identity.
    pub fn persist(self, cert_pem: &str, password: &str) -> Result<Identity, IdentityError> {
        let dir = self.store.certs_dir(&self.aid);
        std::fs::create_dir_all(&dir)?;

        let key_pem = self
            .key
            .to_pkcs8_encrypted_pem(&mut OsRng, password.as_bytes(), LineEnding::LF)
            .map_err(|e| IdentityError::Key(e.to_string()))?;

        let key_path = dir.join(format!("{}.key", self.aid));
        std::fs::write(&key_path, key_pem.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::write(dir.join(format!("{}.crt", self.aid)), cert_pem)?;
        std::fs::write(dir.join(format!("{}.csr", self.aid)), &self.csr_pem)?;
        info!(aid = %self.aid, "persisted identity");

        Ok(Identity {
            aid: self.aid,
            signing_key: SigningKey::from(&self.key),
            cert_pem: cert_pem.to_string(),
            certs_dir: dir,
        })
    }
}

impl Identity {
    pub fn aid(&self) -> &str {
        &self.aid
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn certs_dir(&self) -> &Path {
        &self.certs_dir
    }

    /// ECDSA-SHA-256 signature over `data`, DER-encoded, hex.
    pub fn sign_sha256_hex(&self, data: &[u8]) -> Result<String, IdentityError> {
        let digest = Sha256::digest(data);
        let sig: Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| IdentityError::Key(e.to_string()))?;
        Ok(hex::encode(sig.to_der().as_bytes()))
    }

    /// Extract the SubjectPublicKeyInfo from the stored certificate as a
    /// `PUBLIC KEY` PEM block.
    pub fn public_key_pem(&self) -> Result<String, IdentityError> {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(self.cert_pem.as_bytes())
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let cert = parsed
            .parse_x509()
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let spki = cert.public_key().raw.to_vec();
        Ok(pem::encode(&pem::Pem::new("PUBLIC KEY", spki)))
    }
}
