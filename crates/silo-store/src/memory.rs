use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt, TryStreamExt};
use silo_crypto::ContentHasher;
use silo_types::BackendId;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ByteStream, ObjectBackend, ObjectStat};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory, HashMap-based object backend.
///
/// Intended for tests and embedding. Objects and pins are held behind
/// `RwLock`s. Reads are served in fixed-size chunks so consumers see
/// realistic chunk boundaries.
pub struct InMemoryBackend {
    objects: RwLock<HashMap<BackendId, Bytes>>,
    pins: RwLock<HashSet<BackendId>>,
    pin_calls: AtomicUsize,
    pin_delay: Option<Duration>,
    chunk_size: usize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            pins: RwLock::new(HashSet::new()),
            pin_calls: AtomicUsize::new(0),
            pin_delay: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Make every `pin` call take at least `delay`.
    pub fn with_pin_delay(mut self, delay: Duration) -> Self {
        self.pin_delay = Some(delay);
        self
    }

    /// Serve reads in chunks of `size` bytes (at least one).
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Store `data` directly, bypassing the streaming path.
    pub fn insert(&self, data: impl Into<Bytes>) -> BackendId {
        let data = data.into();
        let id = BackendId::digest(&data);
        self.objects.write().expect("lock poisoned").insert(id, data);
        id
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.objects.read().expect("lock poisoned").contains_key(id)
    }

    pub fn is_pinned(&self, id: &BackendId) -> bool {
        self.pins.read().expect("lock poisoned").contains(id)
    }

    /// How many times `pin` has been called, successful or not.
    pub fn pin_calls(&self) -> usize {
        self.pin_calls.load(Ordering::SeqCst)
    }

    /// Sorted ids of every stored object.
    pub fn all_ids(&self) -> Vec<BackendId> {
        let map = self.objects.read().expect("lock poisoned");
        let mut ids: Vec<BackendId> = map.keys().copied().collect();
        ids.sort();
        ids
    }

    fn lookup(&self, id: &BackendId) -> StoreResult<Bytes> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_hex()))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn put(&self, data: ByteStream) -> StoreResult<BackendId> {
        let mut hasher = ContentHasher::new();
        let buf = data
            .try_fold(BytesMut::new(), |mut buf, chunk| {
                hasher.update(&chunk);
                buf.extend_from_slice(&chunk);
                futures::future::ready(Ok(buf))
            })
            .await?;
        let id = hasher.finalize();
        self.objects
            .write()
            .expect("lock poisoned")
            .entry(id)
            .or_insert_with(|| buf.freeze());
        Ok(id)
    }

    async fn get(&self, id: &BackendId) -> StoreResult<ByteStream> {
        let data = self.lookup(id)?;
        let size = self.chunk_size;
        let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(size)
            .map(|start| Ok(data.slice(start..(start + size).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn pin(&self, id: &BackendId) -> StoreResult<()> {
        self.pin_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.pin_delay {
            tokio::time::sleep(delay).await;
        }
        self.lookup(id)?;
        self.pins.write().expect("lock poisoned").insert(*id);
        Ok(())
    }

    async fn stat(&self, id: &BackendId) -> StoreResult<ObjectStat> {
        let data = self.lookup(id)?;
        Ok(ObjectStat { size: data.len() as u64 })
    }
}
