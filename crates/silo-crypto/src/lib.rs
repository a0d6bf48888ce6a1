//! Cryptographic primitives for the Silo storage node.
//!
//! Provides the node's Ed25519 identity keys with X25519 key agreement,
//! the AES-256-CFB cipher used by the peer handshake, and streaming BLAKE3
//! hashing for content addressing.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod cipher;
pub mod error;
pub mod hasher;
pub mod keys;

pub use cipher::{decrypt, encrypt, random_iv, Iv, IV_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use hasher::ContentHasher;
pub use keys::{Keypair, PublicKey, SharedSecret, PUBLIC_KEY_SIZE};
