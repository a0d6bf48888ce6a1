use silo_crypto::{Iv, IV_SIZE};

use crate::error::{ProtocolError, ProtocolResult};

/// A typed message as exchanged between protocols and the multiplexer.
///
/// Inside a sub-protocol `message_type` is the local code; after passing
/// through [`MultiProtocol`](crate::MultiProtocol) it is the global code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub message_type: u16,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(message_type: u16, payload: Vec<u8>) -> Self {
        Self { message_type, payload }
    }
}

/// Handshake opener: `IV(16) | pubKeyLen(2) | pubKey | cipherLen(2) | cipher`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub iv: Iv,
    pub public_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Response and Finalize body: `cipherLen(2) | cipher`.
///
/// The IV is not transmitted; both sides derive it from the challenge IV.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
}

impl Challenge {
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf =
            Vec::with_capacity(IV_SIZE + 4 + self.public_key.len() + self.ciphertext.len());
        buf.extend_from_slice(&self.iv);
        put_field(&mut buf, &self.public_key)?;
        put_field(&mut buf, &self.ciphertext)?;
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        if data.len() < IV_SIZE {
            return Err(ProtocolError::Malformed("challenge shorter than IV".into()));
        }
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&data[..IV_SIZE]);
        let mut rest = &data[IV_SIZE..];
        let public_key = take_field(&mut rest, "public key")?;
        let ciphertext = take_field(&mut rest, "challenge")?;
        expect_end(rest)?;
        Ok(Self { iv, public_key, ciphertext })
    }
}

impl Sealed {
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(2 + self.ciphertext.len());
        put_field(&mut buf, &self.ciphertext)?;
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        let mut rest = data;
        let ciphertext = take_field(&mut rest, "sealed challenge")?;
        expect_end(rest)?;
        Ok(Self { ciphertext })
    }
}

/// Append a 2-byte big-endian length and the field bytes.
pub(crate) fn put_field(buf: &mut Vec<u8>, field: &[u8]) -> ProtocolResult<()> {
    let len = u16::try_from(field.len()).map_err(|_| ProtocolError::MessageTooLarge {
        size: field.len(),
        max: u16::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(field);
    Ok(())
}

/// Read a length-prefixed field off the front of `rest`.
pub(crate) fn take_field(rest: &mut &[u8], what: &str) -> ProtocolResult<Vec<u8>> {
    if rest.len() < 2 {
        return Err(ProtocolError::Malformed(format!("missing {what} length")));
    }
    let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    if rest.len() < 2 + len {
        return Err(ProtocolError::Malformed(format!(
            "truncated {what}: need {len} bytes, have {}",
            rest.len() - 2
        )));
    }
    let field = rest[2..2 + len].to_vec();
    *rest = &rest[2 + len..];
    Ok(field)
}

pub(crate) fn expect_end(rest: &[u8]) -> ProtocolResult<()> {
    if !rest.is_empty() {
        return Err(ProtocolError::Malformed(format!("{} trailing bytes", rest.len())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> Challenge {
        Challenge { iv: [9u8; IV_SIZE], public_key: vec![1; 32], ciphertext: vec![2; 32] }
    }

    #[test]
    fn challenge_layout() {
        let bytes = challenge().encode().unwrap();
        assert_eq!(bytes.len(), 16 + 2 + 32 + 2 + 32);
        assert_eq!(&bytes[..16], &[9u8; 16]);
        assert_eq!(&bytes[16..18], &[0, 32]);
        assert_eq!(&bytes[50..52], &[0, 32]);
        assert_eq!(Challenge::decode(&bytes).unwrap(), challenge());
    }

    #[test]
    fn sealed_layout() {
        let sealed = Sealed { ciphertext: vec![5; 300] };
        let bytes = sealed.encode().unwrap();
        assert_eq!(&bytes[..2], &[1, 44]);
        assert_eq!(Sealed::decode(&bytes).unwrap(), sealed);
    }

    #[test]
    fn truncated_challenge_is_malformed() {
        let bytes = challenge().encode().unwrap();
        for cut in [0, 10, 17, 40, bytes.len() - 1] {
            assert!(
                matches!(Challenge::decode(&bytes[..cut]), Err(ProtocolError::Malformed(_))),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Sealed { ciphertext: vec![1, 2] }.encode().unwrap();
        bytes.push(0);
        assert!(matches!(Sealed::decode(&bytes), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn oversized_field_rejected() {
        let sealed = Sealed { ciphertext: vec![0; 70_000] };
        assert!(matches!(sealed.encode(), Err(ProtocolError::MessageTooLarge { .. })));
    }
}
