use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use silo_crypto::ContentHasher;
use silo_types::BackendId;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};
use crate::traits::{ByteStream, ObjectBackend, ObjectStat};

/// Object backend on the local filesystem.
///
/// Layout under the root:
///
/// ```text
/// objects/ab/ab12...   object bytes, fanned out by the first hex byte
/// pins/ab12...         empty marker per pinned object
/// staging/             partial uploads, renamed into objects/ when hashed
/// ```
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in ["objects", "pins", "staging"] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        debug!(root = %root.display(), "opened filesystem backend");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, id: &BackendId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(hex)
    }

    fn pin_path(&self, id: &BackendId) -> PathBuf {
        self.root.join("pins").join(id.to_hex())
    }

    pub async fn is_pinned(&self, id: &BackendId) -> bool {
        tokio::fs::try_exists(self.pin_path(id)).await.unwrap_or(false)
    }

    fn not_found(id: &BackendId) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |err| match err.kind() {
            ErrorKind::NotFound => StoreError::NotFound(id.to_hex()),
            _ => StoreError::Io(err),
        }
    }
}

#[async_trait]
impl ObjectBackend for FsBackend {
    #[instrument(skip_all)]
    async fn put(&self, mut data: ByteStream) -> StoreResult<BackendId> {
        let staged = tempfile::Builder::new()
            .prefix("put-")
            .tempfile_in(self.root.join("staging"))?;
        let mut file = tokio::fs::File::from_std(staged.as_file().try_clone()?);
        let mut hasher = ContentHasher::new();
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);

        let id = hasher.finalize();
        let target = self.object_path(&id);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        staged.persist(&target).map_err(|e| StoreError::Io(e.error))?;
        debug!(id = %id.short_hex(), size = hasher.len(), "stored object");
        Ok(id)
    }

    async fn get(&self, id: &BackendId) -> StoreResult<ByteStream> {
        let file = tokio::fs::File::open(self.object_path(id))
            .await
            .map_err(Self::not_found(id))?;
        Ok(ReaderStream::new(file).map_err(StoreError::from).boxed())
    }

    async fn pin(&self, id: &BackendId) -> StoreResult<()> {
        self.stat(id).await?;
        tokio::fs::write(self.pin_path(id), b"").await?;
        Ok(())
    }

    async fn stat(&self, id: &BackendId) -> StoreResult<ObjectStat> {
        let meta = tokio::fs::metadata(self.object_path(id))
            .await
            .map_err(Self::not_found(id))?;
        Ok(ObjectStat { size: meta.len() })
    }
}
