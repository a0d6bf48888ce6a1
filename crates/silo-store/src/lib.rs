//! Content pipeline for the Silo storage node.
//!
//! A [`ContentStore`] sits in front of a content-addressed
//! [`ObjectBackend`] and turns uploads and downloads into sessions:
//!
//! - [`WriteSession`] stages an upload in a temp file, guesses its MIME
//!   type from the first bytes, and commits to the backend only when
//!   asked. Rejected uploads are cleaned up without touching the backend.
//! - [`ReadSession`] resolves a content id, opens the backend stream and
//!   reports the file type alongside it.
//! - [`PinTracker`] coalesces pin requests so a backend object is pinned
//!   by at most one call at a time.
//!
//! Every backend call is bounded by a timeout (30 seconds by default).
//!
//! # Backends
//!
//! - [`InMemoryBackend`]: `HashMap`-based, for tests and embedding
//! - [`FsBackend`]: object files under a root directory

pub mod error;
pub mod fs;
pub mod memory;
pub mod pins;
pub mod read;
pub mod sniff;
pub mod storage;
pub mod traits;
pub mod write;

pub use error::{StoreError, StoreResult};
pub use fs::FsBackend;
pub use memory::InMemoryBackend;
pub use pins::{PinStatus, PinTracker};
pub use read::ReadSession;
pub use sniff::{sniff, sniff_or_default, FileInfo, SNIFF_WINDOW};
pub use storage::{ContentStore, OpenMode, Session, StoreConfig, DEFAULT_TIMEOUT};
pub use traits::{ByteStream, ContentResolver, IdentityResolver, ObjectBackend, ObjectStat};
pub use write::{ContentObject, WriteSession};
