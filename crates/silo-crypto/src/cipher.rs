//! AES-256-CFB, keyed by an ECDH [`SharedSecret`].
//!
//! CFB is a stream mode: ciphertext length equals plaintext length, and a
//! flipped ciphertext bit flips the matching plaintext bit. The handshake
//! relies on exactly that property to detect tampering through its
//! mutate-and-compare step.

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;

use crate::keys::SharedSecret;

pub const IV_SIZE: usize = 16;

pub type Iv = [u8; IV_SIZE];

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// Generate a fresh random IV.
pub fn random_iv() -> Iv {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

pub fn encrypt(secret: &SharedSecret, iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    Aes256CfbEnc::new(secret.as_bytes().into(), iv.into()).encrypt(&mut buf);
    buf
}

pub fn decrypt(secret: &SharedSecret, iv: &Iv, ciphertext: &[u8]) -> Vec<u8> {
    let mut buf = ciphertext.to_vec();
    Aes256CfbDec::new(secret.as_bytes().into(), iv.into()).decrypt(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keypair;

    fn secret() -> SharedSecret {
        Keypair::generate().shared_secret(&Keypair::generate().public_key())
    }

    #[test]
    fn decrypt_recovers_plaintext() {
        let s = secret();
        let iv = random_iv();
        let ct = encrypt(&s, &iv, b"challenge bytes");
        assert_eq!(ct.len(), 15);
        assert_ne!(ct, b"challenge bytes");
        assert_eq!(decrypt(&s, &iv, &ct), b"challenge bytes");
    }

    #[test]
    fn wrong_iv_garbles() {
        let s = secret();
        let iv = random_iv();
        let mut other = iv;
        other[0] ^= 0xff;
        let ct = encrypt(&s, &iv, &[7u8; 32]);
        assert_ne!(decrypt(&s, &other, &ct), vec![7u8; 32]);
    }

    #[test]
    fn wrong_secret_garbles() {
        let iv = random_iv();
        let ct = encrypt(&secret(), &iv, &[7u8; 32]);
        assert_ne!(decrypt(&secret(), &iv, &ct), vec![7u8; 32]);
    }

    #[test]
    fn random_ivs_differ() {
        assert_ne!(random_iv(), random_iv());
    }
}
