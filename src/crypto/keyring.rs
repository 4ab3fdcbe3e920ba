//! Private key ring for the receiving side.
//!
//! Keys live in a directory as `<key_id>.key.pem` (PKCS#8). Several key ids
//! may be loaded at once so that envelopes sealed under a previous key keep
//! opening during a rotation.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use serde_json::Value;
use tracing::{info, warn};

use super::envelope::Envelope;
use super::keys::validate_key_id;
use super::opener::EnvelopeOpener;
use crate::error::{Error, Result};

/// File name suffix of private keys in the keys directory.
pub const PRIVATE_KEY_SUFFIX: &str = ".key.pem";

struct KeyEntry {
    opener: EnvelopeOpener,
    public_pem: String,
}

/// Loaded key pairs, by key id.
#[derive(Default)]
pub struct KeyRing {
    entries: BTreeMap<String, KeyEntry>,
}

impl KeyRing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<key_id>.key.pem` in `dir`.
    ///
    /// A missing directory yields an empty ring. Files with an invalid key id
    /// are skipped with a warning; unreadable keys are errors.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut ring = Self::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "Keys directory does not exist");
                return Ok(ring);
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            let Some(key_id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(PRIVATE_KEY_SUFFIX))
            else {
                continue;
            };

            if validate_key_id(key_id).is_err() {
                warn!(file = %path.display(), "Skipping key file with invalid key id");
                continue;
            }

            let pem = fs::read_to_string(&path)?;
            let opener = EnvelopeOpener::from_pkcs8_pem(key_id, &pem).map_err(|e| {
                Error::Crypto(format!("Failed to load '{}': {e}", path.display()))
            })?;
            ring.insert(opener)?;
        }

        info!(dir = %dir.display(), keys = ring.len(), "Loaded key ring");
        Ok(ring)
    }

    /// Generate a key pair for `key_id` and write it into `dir`.
    ///
    /// Refuses to overwrite an existing key file.
    pub fn generate(dir: &Path, key_id: &str, bits: usize) -> Result<EnvelopeOpener> {
        validate_key_id(key_id)?;

        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::Crypto(format!("Key generation failed: {e}")))?;
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("Failed to encode private key: {e}")))?;

        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{key_id}{PRIVATE_KEY_SUFFIX}"));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(pem.as_bytes())?;

        info!(key_id, path = %path.display(), "Generated key pair");
        Ok(EnvelopeOpener::new(key_id, private_key))
    }

    /// Add a key pair, replacing any with the same id.
    pub fn insert(&mut self, opener: EnvelopeOpener) -> Result<()> {
        let public_pem = opener.public_key_pem()?;
        self.entries.insert(
            opener.key_id().to_string(),
            KeyEntry { opener, public_pem },
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key_id: &str) -> Option<&EnvelopeOpener> {
        self.entries.get(key_id).map(|entry| &entry.opener)
    }

    /// SPKI PEM of the public half of `key_id`.
    #[must_use]
    pub fn public_key_pem(&self, key_id: &str) -> Option<&str> {
        self.entries
            .get(key_id)
            .map(|entry| entry.public_pem.as_str())
    }

    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Open an envelope with the key its `keyId` names.
    pub fn open(&self, envelope: &Envelope) -> Result<Value> {
        let opener = self.get(&envelope.key_id).ok_or_else(|| {
            Error::Envelope(format!("Unknown key id: {}", envelope.key_id))
        })?;
        opener.open(envelope)
    }
}
