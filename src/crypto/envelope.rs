//! Hybrid request envelope: AES-256-GCM body, RSA-OAEP wrapped key.
//!
//! Sealing process:
//! 1. Generate a fresh 256-bit AES key and a fresh 12-byte IV
//! 2. Encrypt the JSON-serialized payload with AES-256-GCM
//! 3. Wrap the raw AES key with RSA-OAEP (SHA-256) under the recipient's key
//! 4. Base64-encode the binary fields into an [`Envelope`]
//!
//! # Security
//!
//! Key and IV are never reused across calls. Symmetric key material is zeroed
//! from memory when dropped using the `zeroize` crate.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::prelude::*;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Algorithm tag carried by every envelope.
pub const ENVELOPE_ALG: &str = "RSA-OAEP+AES-GCM";

/// Size of the AES-GCM initialization vector.
pub const IV_SIZE: usize = 12;

/// Size of the raw AES-256 key.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// Encrypted request body as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Base64 AES-GCM IV (12 bytes).
    pub iv: String,
    /// Base64 RSA-OAEP wrapped AES key.
    pub encrypted_key: String,
    /// Base64 AES-GCM ciphertext with the 16-byte tag appended.
    pub ciphertext: String,
    /// Which recipient key pair wrapped the AES key.
    pub key_id: String,
    /// Always [`ENVELOPE_ALG`].
    pub alg: String,
}

/// AES-256-GCM key, extractable, usable for encrypt and decrypt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a fresh key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Rebuild a key from raw bytes, e.g. after unwrapping.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SYMMETRIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid symmetric key size: expected {SYMMETRIC_KEY_SIZE}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes, for wrapping.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }

    /// Encrypt with AES-256-GCM. The tag is appended to the output.
    pub fn encrypt(&self, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher()?
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {e}")))
    }

    /// Decrypt and authenticate AES-256-GCM output.
    pub fn decrypt(&self, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.cipher()?
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| Error::Crypto(format!("Decryption failed: {e}")))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| Error::Crypto(format!("Failed to create cipher: {e}")))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Generate a fresh 256-bit AES-GCM key.
#[must_use]
pub fn generate_symmetric_key() -> SymmetricKey {
    SymmetricKey::generate()
}

/// Import an RSA public key for OAEP encryption.
///
/// Accepts SPKI PEM (`-----BEGIN PUBLIC KEY-----`) or the bare base64 body.
pub fn import_public_key(pem: &str) -> Result<RsaPublicKey> {
    let body: String = pem
        .replace(PEM_HEADER, "")
        .replace(PEM_FOOTER, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let der = BASE64_STANDARD.decode(body)?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| Error::Crypto(format!("Invalid SPKI public key: {e}")))
}

/// The recipient key, either already imported or as PEM text.
#[derive(Debug, Clone, Copy)]
pub enum PublicKeyInput<'a> {
    Pem(&'a str),
    Key(&'a RsaPublicKey),
}

impl<'a> From<&'a str> for PublicKeyInput<'a> {
    fn from(pem: &'a str) -> Self {
        Self::Pem(pem)
    }
}

impl<'a> From<&'a String> for PublicKeyInput<'a> {
    fn from(pem: &'a String) -> Self {
        Self::Pem(pem)
    }
}

impl<'a> From<&'a RsaPublicKey> for PublicKeyInput<'a> {
    fn from(key: &'a RsaPublicKey) -> Self {
        Self::Key(key)
    }
}

/// Seal a JSON-serializable value for the holder of `key_id`.
pub fn encrypt_payload<'a, T>(
    plain: &T,
    public_key: impl Into<PublicKeyInput<'a>>,
    key_id: &str,
) -> Result<Envelope>
where
    T: Serialize + ?Sized,
{
    let imported;
    let public_key = match public_key.into() {
        PublicKeyInput::Key(key) => key,
        PublicKeyInput::Pem(pem) => {
            imported = import_public_key(pem)?;
            &imported
        }
    };

    let symmetric_key = generate_symmetric_key();
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let plaintext = Zeroizing::new(serde_json::to_vec(plain)?);
    let ciphertext = symmetric_key.encrypt(&iv, &plaintext)?;

    let encrypted_key = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), symmetric_key.as_bytes())
        .map_err(|e| Error::Crypto(format!("Key wrapping failed: {e}")))?;

    Ok(Envelope {
        iv: BASE64_STANDARD.encode(iv),
        encrypted_key: BASE64_STANDARD.encode(encrypted_key),
        ciphertext: BASE64_STANDARD.encode(ciphertext),
        key_id: key_id.to_string(),
        alg: ENVELOPE_ALG.to_string(),
    })
}
