use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use silo_types::{BackendId, ContentId};
use tracing::{debug, instrument, warn};

use crate::error::{StoreError, StoreResult};
use crate::pins::PinTracker;
use crate::read::ReadSession;
use crate::sniff::SNIFF_WINDOW;
use crate::traits::{ContentResolver, IdentityResolver, ObjectBackend, ObjectStat};
use crate::write::WriteSession;

/// Applied to every backend call that is not given its own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub timeout: Duration,
    /// Where write sessions stage uploads. The system temp dir if unset.
    pub staging_dir: Option<PathBuf>,
    pub sniff_window: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, staging_dir: None, sniff_window: SNIFF_WINDOW }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl FromStr for OpenMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            other => Err(StoreError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum Session {
    Read(ReadSession),
    Write(WriteSession),
}

/// The content pipeline: resolves content ids, stages uploads, streams
/// reads and keeps pins, all over one [`ObjectBackend`].
///
/// Cheap to clone; clones share the backend and the pin tracker.
#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn ObjectBackend>,
    resolver: Arc<dyn ContentResolver>,
    pins: PinTracker,
    config: StoreConfig,
}

impl ContentStore {
    /// A store with the identity resolver and default config.
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            resolver: Arc::new(IdentityResolver),
            pins: PinTracker::new(),
            config: StoreConfig::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pin_tracker(mut self, pins: PinTracker) -> Self {
        self.pins = pins;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    pub fn pins(&self) -> &PinTracker {
        &self.pins
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn resolve(&self, id: &ContentId, timeout: Option<Duration>) -> StoreResult<BackendId> {
        with_timeout("resolve", self.timeout(timeout), self.resolver.resolve(id)).await
    }

    pub async fn open(&self, id: &ContentId, mode: OpenMode, timeout: Option<Duration>) -> StoreResult<Session> {
        match mode {
            OpenMode::Read => self.open_read(id, timeout).await.map(Session::Read),
            OpenMode::Write => self.open_write(id).map(Session::Write),
        }
    }

    pub fn open_write(&self, id: &ContentId) -> StoreResult<WriteSession> {
        WriteSession::create(id.clone(), self.backend.clone(), self.pins.clone(), &self.config)
    }

    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn open_read(&self, id: &ContentId, timeout: Option<Duration>) -> StoreResult<ReadSession> {
        let timeout = self.timeout(timeout);
        let backend_id = self.resolve(id, Some(timeout)).await?;
        let open = ReadSession::open(id.clone(), backend_id, self.backend.as_ref(), self.config.sniff_window);
        let session = with_timeout("open", timeout, open).await?;
        debug!(mime = %session.file_info().mime_type, "opened for reading");
        Ok(session)
    }

    pub async fn stat(&self, id: &ContentId, timeout: Option<Duration>) -> StoreResult<ObjectStat> {
        let timeout = self.timeout(timeout);
        let backend_id = self.resolve(id, Some(timeout)).await?;
        with_timeout("stat", timeout, self.backend.stat(&backend_id)).await
    }

    pub async fn size(&self, id: &ContentId, timeout: Option<Duration>) -> StoreResult<u64> {
        self.stat(id, timeout).await.map(|stat| stat.size)
    }

    /// Make sure the content is pinned. Concurrent calls for the same
    /// content share one backend pin.
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn synchronize(&self, id: &ContentId) -> StoreResult<()> {
        let backend_id = self.resolve(id, None).await?;
        self.pins
            .pin(self.backend.clone(), backend_id, self.config.timeout)
            .await
    }

    fn timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.config.timeout)
    }
}

/// Bound `fut` by `timeout`. Expiry is reported as [`StoreError::Timeout`]
/// whatever the backend does afterwards.
pub(crate) async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?timeout, "backend call timed out");
            Err(StoreError::Timeout { operation, timeout })
        }
    }
}
