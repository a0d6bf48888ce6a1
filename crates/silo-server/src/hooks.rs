use async_trait::async_trait;
use silo_store::ContentObject;
use silo_types::ContentId;

use crate::error::ServerResult;

/// Notified about the outcome of uploads, e.g. to accept or reject the
/// content with whoever assigned it to this node.
#[async_trait]
pub trait UploadHook: Send + Sync {
    /// The upload is committed, pinned and matches expectations. An error
    /// fails the request.
    async fn post_commit(&self, object: &ContentObject) -> ServerResult<()>;

    /// The upload was refused after it started. Errors are only logged.
    async fn rejected(&self, id: &ContentId, reason: &str) -> ServerResult<()>;
}

pub struct NoOpHook;

#[async_trait]
impl UploadHook for NoOpHook {
    async fn post_commit(&self, _object: &ContentObject) -> ServerResult<()> {
        Ok(())
    }

    async fn rejected(&self, _id: &ContentId, _reason: &str) -> ServerResult<()> {
        Ok(())
    }
}
