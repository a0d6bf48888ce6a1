use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use silo_types::BackendId;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::ObjectBackend;

/// Where a backend id stands with respect to pinning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinStatus {
    Pinning,
    Pinned,
}

#[derive(Clone, Debug)]
enum PinOutcome {
    Pinned,
    Failed(String),
    TimedOut(Duration),
}

enum Entry {
    Pinning(watch::Receiver<Option<PinOutcome>>),
    Pinned,
}

/// Coalesces pin requests per backend id.
///
/// At most one backend pin call is in flight per id. Callers arriving
/// while one is running wait for its outcome instead of issuing their
/// own. Failed or timed-out pins leave no entry behind, so the next
/// request starts over. The pin itself runs on its own task: a caller
/// that gives up waiting does not abandon the entry half-way.
///
/// Clones share state. Inject one per store; tests build fresh ones.
#[derive(Clone, Default)]
pub struct PinTracker {
    entries: Arc<Mutex<HashMap<BackendId, Entry>>>,
}

impl PinTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: &BackendId) -> Option<PinStatus> {
        self.entries.lock().expect("lock poisoned").get(id).map(|e| match e {
            Entry::Pinning(_) => PinStatus::Pinning,
            Entry::Pinned => PinStatus::Pinned,
        })
    }

    pub fn is_pinned(&self, id: &BackendId) -> bool {
        self.status(id) == Some(PinStatus::Pinned)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry. In-flight pins still finish on the backend.
    pub fn clear(&self) {
        self.entries.lock().expect("lock poisoned").clear();
    }

    /// Make sure `id` is pinned, calling the backend at most once
    /// across concurrent callers.
    pub async fn pin(
        &self,
        backend: Arc<dyn ObjectBackend>,
        id: BackendId,
        timeout: Duration,
    ) -> StoreResult<()> {
        let mut rx = {
            let mut entries = self.entries.lock().expect("lock poisoned");
            match entries.get(&id) {
                Some(Entry::Pinned) => return Ok(()),
                Some(Entry::Pinning(rx)) => {
                    debug!(id = %id.short_hex(), "pin already in flight");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(id, Entry::Pinning(rx.clone()));
                    self.spawn_pin(backend, id, timeout, tx);
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => {
                // The pin task died without reporting.
                self.forget_pending(&id);
                return Err(StoreError::Unavailable("pin task aborted".into()));
            }
        };
        match outcome {
            Some(PinOutcome::Pinned) => Ok(()),
            Some(PinOutcome::Failed(msg)) => Err(StoreError::Unavailable(msg)),
            Some(PinOutcome::TimedOut(timeout)) => Err(StoreError::Timeout { operation: "pin", timeout }),
            None => unreachable!("wait_for only returns once an outcome is set"),
        }
    }

    fn spawn_pin(
        &self,
        backend: Arc<dyn ObjectBackend>,
        id: BackendId,
        timeout: Duration,
        tx: watch::Sender<Option<PinOutcome>>,
    ) {
        let tracker = self.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, backend.pin(&id)).await {
                Ok(Ok(())) => PinOutcome::Pinned,
                Ok(Err(err)) => PinOutcome::Failed(err.to_string()),
                Err(_) => PinOutcome::TimedOut(timeout),
            };
            {
                let mut entries = tracker.entries.lock().expect("lock poisoned");
                match outcome {
                    PinOutcome::Pinned => {
                        entries.insert(id, Entry::Pinned);
                    }
                    _ => {
                        entries.remove(&id);
                    }
                }
            }
            match &outcome {
                PinOutcome::Pinned => debug!(id = %id.short_hex(), "pinned"),
                other => warn!(id = %id.short_hex(), outcome = ?other, "pin failed, entry rolled back"),
            }
            let _ = tx.send(Some(outcome));
        });
    }

    fn forget_pending(&self, id: &BackendId) {
        let mut entries = self.entries.lock().expect("lock poisoned");
        if matches!(entries.get(id), Some(Entry::Pinning(_))) {
            entries.remove(id);
        }
    }
}
