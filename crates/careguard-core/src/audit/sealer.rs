use crate::action::SubjectId;
use crate::error::{GuardError, Result};
use crate::paths;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

const KEY_BYTES: usize = 32;

/// Keyed pseudonym of a patient identifier. Stable for one key, so audit
/// queries by patient compare sealed forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSubject(String);

impl SealedSubject {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SealedSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// HMAC-SHA256 sealer for subject identifiers.
#[derive(Clone)]
pub struct SubjectSealer {
    mac: HmacSha256,
}

impl fmt::Debug for SubjectSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubjectSealer(<key>)")
    }
}

impl SubjectSealer {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() < 16 {
            return Err(GuardError::Configuration(format!(
                "subject key must be at least 16 bytes, got {}",
                key.len()
            )));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| GuardError::Configuration(format!("subject key: {e}")))?;
        Ok(Self { mac })
    }

    /// Build from a base64url-encoded key as written by [`generate_key`](Self::generate_key).
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let key = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| GuardError::Configuration(format!("subject key is not base64url: {e}")))?;
        Self::new(&key)
    }

    /// Resolve the key from `CAREGUARD_SUBJECT_KEY`, falling back to
    /// `.careguard/subject.key` under `root`.
    pub fn load(root: &Path) -> Result<Self> {
        if let Ok(encoded) = std::env::var(paths::SUBJECT_KEY_ENV) {
            if !encoded.trim().is_empty() {
                return Self::from_encoded(&encoded);
            }
        }
        let path = paths::subject_key_path(root);
        if !path.exists() {
            return Err(GuardError::Configuration(format!(
                "no subject key: set {} or create {}",
                paths::SUBJECT_KEY_ENV,
                path.display()
            )));
        }
        Self::from_encoded(&std::fs::read_to_string(&path)?)
    }

    /// Write a fresh key to `.careguard/subject.key` unless one is there.
    /// An existing key is never replaced: entries sealed with it would stop
    /// matching patient queries.
    pub fn create_key(root: &Path) -> Result<bool> {
        let key = Self::generate_key();
        crate::io::create_secret(&paths::subject_key_path(root), key.as_bytes())
    }

    /// A fresh random key, base64url-encoded.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut key);
        URL_SAFE_NO_PAD.encode(key)
    }

    pub fn seal(&self, subject: &SubjectId) -> SealedSubject {
        self.seal_str(subject.expose())
    }

    pub fn seal_str(&self, subject: &str) -> SealedSubject {
        let mut mac = self.mac.clone();
        mac.update(subject.as_bytes());
        SealedSubject(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}
