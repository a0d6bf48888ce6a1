use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use silo_types::{BackendId, ContentId};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// A stream of content bytes.
pub type ByteStream = BoxStream<'static, StoreResult<Bytes>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
}

/// Content-addressed blob store behind the content pipeline.
///
/// All implementations must satisfy these invariants:
/// - `put` derives the id from the bytes alone; storing the same bytes
///   twice yields the same id and is a no-op the second time.
/// - `get`, `pin` and `stat` on an unknown id fail with
///   [`StoreError::NotFound`].
/// - `pin` is idempotent.
///
/// Timeouts are applied by the caller, not the backend.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put(&self, data: ByteStream) -> StoreResult<BackendId>;

    async fn get(&self, id: &BackendId) -> StoreResult<ByteStream>;

    /// Ask the backend to retain the object.
    async fn pin(&self, id: &BackendId) -> StoreResult<()>;

    async fn stat(&self, id: &BackendId) -> StoreResult<ObjectStat>;
}

/// Maps domain content ids to backend ids.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, id: &ContentId) -> StoreResult<BackendId>;
}

/// Treats the content id as the hex form of the backend id.
///
/// Only sensible when uploads are addressed by their own hash, as in
/// development and tests.
pub struct IdentityResolver;

#[async_trait]
impl ContentResolver for IdentityResolver {
    async fn resolve(&self, id: &ContentId) -> StoreResult<BackendId> {
        debug!(content_id = %id, "identity resolution");
        BackendId::from_hex(id.as_str()).map_err(|e| StoreError::InvalidId(format!("{id}: {e}")))
    }
}
