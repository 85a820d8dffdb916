//! Key material for archives
//!
//! Every archive is identified by an Ed25519 public key. A freshly created
//! archive gets a new [`KeyPair`]; the secret half goes to the storage
//! backend, the public half becomes the archive's registry key.
//!
//! The discovery key ([`PublicKey::discovery_key`]) is a one-way derivation
//! of the public key. It names the archive's storage directory and is the
//! topic peers meet on, so the public key itself is never announced.

mod keys;

pub use keys::{KeyError, KeyPair, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
