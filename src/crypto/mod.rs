//! Hybrid request encryption: sealing with a fetched public key, opening with
//! the key ring.

pub mod envelope;
pub mod keyring;
pub mod keys;
pub mod opener;

pub use envelope::{Envelope, encrypt_payload};
pub use keyring::KeyRing;
pub use keys::{KeyFetcher, WELL_KNOWN_KEY_PATH, public_key_path, validate_key_id};
