use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use silo_types::{BackendId, ContentId};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::pins::PinTracker;
use crate::sniff::{sniff, sniff_or_default, FileInfo};
use crate::storage::{with_timeout, StoreConfig};
use crate::traits::ObjectBackend;

/// What a successful commit stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContentObject {
    pub id: ContentId,
    pub backend_id: BackendId,
    pub size: u64,
    #[serde(flatten)]
    pub info: FileInfo,
}

struct Staged {
    temp: NamedTempFile,
    file: tokio::fs::File,
}

/// An upload in progress.
///
/// Bytes go to a temp file owned by the session. The first
/// `sniff_window` bytes are also kept in memory; once that many have
/// arrived the type is guessed and published to subscribers. If the
/// guess fails, or the upload is shorter, [`finish`](Self::finish)
/// tries again with what there is and falls back to
/// `application/octet-stream`.
///
/// Nothing reaches the backend until [`commit`](Self::commit). Either
/// `commit` or [`cleanup`](Self::cleanup) closes the session and removes
/// the temp file; dropping the session removes it too.
pub struct WriteSession {
    id: ContentId,
    backend: Arc<dyn ObjectBackend>,
    pins: PinTracker,
    timeout: Duration,
    sniff_window: usize,
    staged: Option<Staged>,
    head: Vec<u8>,
    written: u64,
    finished: bool,
    committed: Option<BackendId>,
    info: watch::Sender<Option<FileInfo>>,
}

impl WriteSession {
    pub(crate) fn create(
        id: ContentId,
        backend: Arc<dyn ObjectBackend>,
        pins: PinTracker,
        config: &StoreConfig,
    ) -> StoreResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("silo-upload-");
        let temp = match &config.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let file = tokio::fs::File::from_std(temp.as_file().try_clone()?);
        debug!(content_id = %id, path = %temp.path().display(), "opened write session");
        Ok(Self {
            id,
            backend,
            pins,
            timeout: config.timeout,
            sniff_window: config.sniff_window,
            staged: Some(Staged { temp, file }),
            head: Vec::new(),
            written: 0,
            finished: false,
            committed: None,
            info: watch::channel(None).0,
        })
    }

    pub fn content_id(&self) -> &ContentId {
        &self.id
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// The temp file, while the session is open.
    pub fn staged_path(&self) -> Option<&Path> {
        self.staged.as_ref().map(|s| s.temp.path())
    }

    pub fn is_closed(&self) -> bool {
        self.staged.is_none()
    }

    /// Backend id assigned by a commit, even if pinning then failed.
    pub fn backend_id(&self) -> Option<BackendId> {
        self.committed
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        self.info.borrow().clone()
    }

    /// Receive the file info as soon as it is known.
    pub fn subscribe(&self) -> watch::Receiver<Option<FileInfo>> {
        self.info.subscribe()
    }

    /// Append a chunk. Returns the file info if this chunk completed
    /// detection.
    pub async fn write(&mut self, chunk: &[u8]) -> StoreResult<Option<FileInfo>> {
        if self.finished {
            return Err(StoreError::SessionClosed);
        }
        let staged = self.staged.as_mut().ok_or(StoreError::SessionClosed)?;
        staged.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;

        if self.info.borrow().is_some() || self.head.len() >= self.sniff_window {
            return Ok(None);
        }
        let take = (self.sniff_window - self.head.len()).min(chunk.len());
        self.head.extend_from_slice(&chunk[..take]);
        if self.head.len() < self.sniff_window {
            return Ok(None);
        }
        Ok(sniff(&self.head).inspect(|info| self.publish(info.clone())))
    }

    /// Drain `stream` into the session. Returns the bytes written.
    pub async fn write_stream<S, E>(&mut self, mut stream: S) -> StoreResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
            self.write(&chunk).await?;
        }
        Ok(self.written)
    }

    /// Mark the end of the stream and settle the file info.
    pub async fn finish(&mut self) -> StoreResult<FileInfo> {
        let staged = self.staged.as_mut().ok_or(StoreError::SessionClosed)?;
        if !self.finished {
            staged.file.flush().await?;
            staged.file.sync_all().await?;
            self.finished = true;
        }
        if let Some(info) = self.file_info() {
            return Ok(info);
        }
        let info = sniff_or_default(&self.head);
        self.publish(info.clone());
        Ok(info)
    }

    /// Push the staged bytes to the backend and pin the result.
    ///
    /// The session closes once the backend holds the bytes. A failed put
    /// leaves it open so the caller can still clean up.
    pub async fn commit(&mut self) -> StoreResult<ContentObject> {
        let info = self.finish().await?;
        let path = self
            .staged_path()
            .map(Path::to_path_buf)
            .ok_or(StoreError::SessionClosed)?;

        let reader = tokio::fs::File::open(&path).await?;
        let data = ReaderStream::new(reader).map_err(StoreError::from).boxed();
        let backend_id = with_timeout("put", self.timeout, self.backend.put(data)).await?;
        self.committed = Some(backend_id);
        self.close();
        info!(content_id = %self.id, backend_id = %backend_id.short_hex(), size = self.written, "committed upload");

        self.pins.pin(self.backend.clone(), backend_id, self.timeout).await?;
        Ok(ContentObject { id: self.id.clone(), backend_id, size: self.written, info })
    }

    /// Discard the upload. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.staged.is_some() {
            debug!(content_id = %self.id, "discarding upload");
            self.close();
        }
    }

    fn close(&mut self) {
        if let Some(Staged { temp, file }) = self.staged.take() {
            drop(file);
            if let Err(err) = temp.close() {
                warn!(content_id = %self.id, error = %err, "failed to remove staged upload");
            }
        }
    }

    fn publish(&self, info: FileInfo) {
        debug!(content_id = %self.id, mime = %info.mime_type, "detected file type");
        self.info.send_replace(Some(info));
    }
}

impl std::fmt::Debug for WriteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSession")
            .field("id", &self.id)
            .field("written", &self.written)
            .field("finished", &self.finished)
            .field("closed", &self.is_closed())
            .finish()
    }
}
