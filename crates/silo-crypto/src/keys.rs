use std::path::Path;

use crate::error::{CryptoError, CryptoResult};

/// Length of an encoded public key on the wire.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// The node's identity keypair (Ed25519).
///
/// The same key is used for key agreement: both halves are mapped onto
/// Curve25519 and combined with X25519, so a peer proves possession of the
/// private key simply by deriving the same shared secret.
pub struct Keypair(ed25519_dalek::SigningKey);

/// A peer's public identity key (Ed25519).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

/// 32-byte ECDH output, used directly as an AES-256 key.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; 32]);

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from a raw 32-byte secret.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Raw secret key bytes.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// X25519 agreement between our private key and a peer's public key.
    ///
    /// `a.shared_secret(&b.public_key()) == b.shared_secret(&a.public_key())`.
    pub fn shared_secret(&self, peer: &PublicKey) -> SharedSecret {
        let scalar = self.0.to_scalar_bytes();
        let point = peer.0.to_montgomery().to_bytes();
        SharedSecret(x25519_dalek::x25519(scalar, point))
    }

    /// Load a keypair from a file holding the hex-encoded secret.
    pub fn load(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let secret: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| CryptoError::InvalidLength {
            expected: 32,
            actual: b.len(),
        })?;
        Ok(Self::from_bytes(secret))
    }

    /// Write the hex-encoded secret to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> CryptoResult<()> {
        std::fs::write(path, format!("{}\n", hex::encode(self.secret_bytes())))?;
        Ok(())
    }
}

impl PublicKey {
    /// Parse a public key received from a peer.
    ///
    /// Rejects malformed points and small-order ("weak") keys, which would
    /// make the agreed secret predictable.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: PUBLIC_KEY_SIZE,
            actual: bytes.len(),
        })?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        if key.is_weak() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Self(key))
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Raw public key bytes.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Abbreviated form (`abcdef...123456`) for log lines.
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}...{}", &hex[..6], &hex[hex.len() - 6..])
    }
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({}, <redacted>)", self.public_key().short())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_eq!(a.shared_secret(&b.public_key()), b.shared_secret(&a.public_key()));
    }

    #[test]
    fn agreement_differs_per_peer() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let c = Keypair::generate();
        assert_ne!(a.shared_secret(&b.public_key()), a.shared_secret(&c.public_key()));
    }

    #[test]
    fn public_key_parses_back() {
        let kp = Keypair::generate();
        let pk = kp.public_key();
        assert_eq!(PublicKey::from_bytes(&pk.to_bytes()).unwrap(), pk);
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }

    #[test]
    fn public_key_rejects_wrong_length() {
        let err = PublicKey::from_bytes(&[1u8; 31]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidLength { expected: 32, actual: 31 }));
    }

    #[test]
    fn public_key_rejects_weak_point() {
        // The identity point encodes as 0x01 followed by zeros.
        let mut identity = [0u8; 32];
        identity[0] = 1;
        assert!(matches!(PublicKey::from_bytes(&identity), Err(CryptoError::InvalidPublicKey)));
    }

    #[test]
    fn short_form_is_abbreviated() {
        let pk = Keypair::generate().public_key();
        let short = pk.short();
        assert_eq!(short.len(), 15);
        assert!(pk.to_hex().starts_with(&short[..6]));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        let kp = Keypair::generate();
        kp.save(&path).unwrap();
        let loaded = Keypair::load(&path).unwrap();
        assert_eq!(loaded.public_key(), kp.public_key());
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        std::fs::write(&path, "not hex").unwrap();
        assert!(matches!(Keypair::load(&path), Err(CryptoError::InvalidEncoding(_))));
    }

    #[test]
    fn debug_redacts_secret() {
        let kp = Keypair::generate();
        assert!(format!("{kp:?}").contains("redacted"));
        let secret = kp.shared_secret(&Keypair::generate().public_key());
        assert!(format!("{secret:?}").contains("redacted"));
    }
}
