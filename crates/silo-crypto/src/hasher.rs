use silo_types::BackendId;

/// Incremental BLAKE3 hasher producing [`BackendId`]s.
///
/// Backends feed staged content through this as it is written so the
/// object's address is known the moment the last byte lands, without a
/// second pass over the data.
#[derive(Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self.len += data.len() as u64;
        self
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(&self) -> BackendId {
        BackendId::from_hash(*self.inner.finalize().as_bytes())
    }

    /// Verify that data produces the expected id.
    pub fn verify(data: &[u8], expected: &BackendId) -> bool {
        BackendId::digest(data) == *expected
    }
}
