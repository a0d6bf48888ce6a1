use serde::{Deserialize, Serialize};

/// Bytes of a stream's head needed for a confident guess.
pub const SNIFF_WINDOW: usize = 4100;

/// MIME type and extension guessed from a content's leading bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub mime_type: String,
    pub extension: String,
}

impl FileInfo {
    pub fn new(mime_type: impl Into<String>, extension: impl Into<String>) -> Self {
        Self { mime_type: mime_type.into(), extension: extension.into() }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for FileInfo {
    fn default() -> Self {
        Self::new("application/octet-stream", "bin")
    }
}

/// Guess the type from magic bytes. `None` when nothing matches.
pub fn sniff(head: &[u8]) -> Option<FileInfo> {
    infer::get(head).map(|kind| FileInfo::new(kind.mime_type(), kind.extension()))
}

/// Like [`sniff`], falling back to `application/octet-stream`.
pub fn sniff_or_default(head: &[u8]) -> FileInfo {
    sniff(head).unwrap_or_default()
}
