//! Receiving side of the envelope: unwrap the AES key and decrypt the body.

use base64::prelude::*;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::envelope::{ENVELOPE_ALG, Envelope, IV_SIZE, SymmetricKey};
use crate::error::{Error, Result};

/// Opens envelopes addressed to one key id.
#[derive(Clone)]
pub struct EnvelopeOpener {
    key_id: String,
    private_key: RsaPrivateKey,
}

impl EnvelopeOpener {
    /// Create an opener for `key_id` backed by `private_key`.
    pub fn new(key_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            key_id: key_id.into(),
            private_key,
        }
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(key_id: impl Into<String>, pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::Crypto(format!("Invalid PKCS#8 private key: {e}")))?;
        Ok(Self::new(key_id, private_key))
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    #[must_use]
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// SPKI PEM of the public half, as served at the well-known path.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("Failed to encode public key: {e}")))
    }

    /// Hex SHA-256 of the public key's SPKI DER encoding.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self
            .public_key()
            .to_public_key_der()
            .map_err(|e| Error::Crypto(format!("Failed to encode public key: {e}")))?;
        Ok(hex::encode(Sha256::digest(der.as_bytes())))
    }

    /// Decrypt an envelope into the original JSON value.
    pub fn open(&self, envelope: &Envelope) -> Result<Value> {
        self.open_as(envelope)
    }

    /// Decrypt an envelope and deserialize it into `T`.
    pub fn open_as<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T> {
        let plaintext = self.open_bytes(envelope)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Process:
    /// 1. Check algorithm tag and key id
    /// 2. Decode and size-check the IV
    /// 3. Unwrap the AES key with RSA-OAEP (SHA-256)
    /// 4. Decrypt and authenticate the ciphertext
    fn open_bytes(&self, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>> {
        if envelope.alg != ENVELOPE_ALG {
            return Err(Error::Envelope(format!(
                "Unsupported algorithm: {}",
                envelope.alg
            )));
        }

        if envelope.key_id != self.key_id {
            return Err(Error::Envelope(format!(
                "Envelope is for key '{}', not '{}'",
                envelope.key_id, self.key_id
            )));
        }

        let iv_bytes = BASE64_STANDARD.decode(&envelope.iv)?;
        let iv: [u8; IV_SIZE] = iv_bytes.as_slice().try_into().map_err(|_| {
            Error::Envelope(format!(
                "Invalid IV size: expected {IV_SIZE}, got {}",
                iv_bytes.len()
            ))
        })?;

        let wrapped_key = BASE64_STANDARD.decode(&envelope.encrypted_key)?;
        let raw_key = Zeroizing::new(
            self.private_key
                .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
                .map_err(|e| Error::Crypto(format!("Key unwrapping failed: {e}")))?,
        );
        let symmetric_key = SymmetricKey::from_slice(&raw_key)?;

        let ciphertext = BASE64_STANDARD.decode(&envelope.ciphertext)?;
        symmetric_key.decrypt(&iv, &ciphertext)
    }
}

impl std::fmt::Debug for EnvelopeOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeOpener")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
