use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use axum::http::StatusCode;
use silo_types::{BackendId, ContentId};

use crate::error::{ServerError, ServerResult};

/// What this node may expect of an upload it agreed to take.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadGrant {
    /// Declared size; a `Content-Length` that differs is refused.
    pub expected_size: Option<u64>,
    /// Backend id the committed bytes must hash to.
    pub expected_backend_id: Option<BackendId>,
}

/// Decides whether this node is the liaison for a piece of content,
/// i.e. whether it should accept an upload for it at all.
#[async_trait]
pub trait LiaisonProvider: Send + Sync {
    async fn authorize_upload(&self, id: &ContentId) -> ServerResult<UploadGrant>;
}

/// Accepts every upload with no expectations.
pub struct AllowAllLiaison;

#[async_trait]
impl LiaisonProvider for AllowAllLiaison {
    async fn authorize_upload(&self, _id: &ContentId) -> ServerResult<UploadGrant> {
        Ok(UploadGrant::default())
    }
}

/// Grants held in memory. Content without a grant is refused.
#[derive(Default)]
pub struct StaticLiaison {
    grants: RwLock<HashMap<ContentId, UploadGrant>>,
}

impl StaticLiaison {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, id: ContentId, grant: UploadGrant) {
        self.grants.write().expect("lock poisoned").insert(id, grant);
    }

    pub fn revoke(&self, id: &ContentId) {
        self.grants.write().expect("lock poisoned").remove(id);
    }
}

#[async_trait]
impl LiaisonProvider for StaticLiaison {
    async fn authorize_upload(&self, id: &ContentId) -> ServerResult<UploadGrant> {
        self.grants
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::rejected(StatusCode::FORBIDDEN, "Not the liaison for this content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_grants_without_expectations() {
        let id = ContentId::new("anything").unwrap();
        assert_eq!(AllowAllLiaison.authorize_upload(&id).await.unwrap(), UploadGrant::default());
    }

    #[tokio::test]
    async fn static_liaison_grants_and_revokes() {
        let liaison = StaticLiaison::new();
        let id = ContentId::new("asset-7").unwrap();
        assert_eq!(
            liaison.authorize_upload(&id).await.unwrap_err().status(),
            StatusCode::FORBIDDEN
        );

        let grant = UploadGrant { expected_size: Some(12), expected_backend_id: None };
        liaison.grant(id.clone(), grant.clone());
        assert_eq!(liaison.authorize_upload(&id).await.unwrap(), grant);

        liaison.revoke(&id);
        assert!(liaison.authorize_upload(&id).await.is_err());
    }
}
