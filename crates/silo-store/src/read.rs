use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use silo_types::{BackendId, ContentId};

use crate::error::StoreResult;
use crate::sniff::{sniff_or_default, FileInfo};
use crate::traits::{ByteStream, ObjectBackend};

/// A stored object opened for reading.
///
/// Opening reads ahead far enough to guess the file type; those chunks
/// are replayed at the front of the stream, so consumers still see every
/// byte from the start.
pub struct ReadSession {
    id: ContentId,
    backend_id: BackendId,
    info: FileInfo,
    stream: ByteStream,
}

impl ReadSession {
    pub(crate) async fn open(
        id: ContentId,
        backend_id: BackendId,
        backend: &dyn ObjectBackend,
        sniff_window: usize,
    ) -> StoreResult<Self> {
        let mut rest = backend.get(&backend_id).await?;
        let mut head = Vec::with_capacity(sniff_window);
        let mut buffered = Vec::new();
        while head.len() < sniff_window {
            let Some(chunk) = rest.next().await else { break };
            let chunk = chunk?;
            let take = (sniff_window - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            buffered.push(Ok(chunk));
        }
        let info = sniff_or_default(&head);
        let stream = stream::iter(buffered).chain(rest).boxed();
        Ok(Self { id, backend_id, info, stream })
    }

    pub fn content_id(&self) -> &ContentId {
        &self.id
    }

    pub fn backend_id(&self) -> &BackendId {
        &self.backend_id
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.info
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// The content as `std::io` results, for HTTP bodies.
    pub fn into_io_stream(self) -> BoxStream<'static, std::io::Result<Bytes>> {
        self.stream.map_err(|e| e.into_io()).boxed()
    }
}

impl std::fmt::Debug for ReadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSession")
            .field("id", &self.id)
            .field("backend_id", &self.backend_id)
            .field("info", &self.info)
            .finish()
    }
}
