use std::sync::Arc;

use silo_store::ContentStore;

use crate::auth::{AllowAllLiaison, LiaisonProvider};
use crate::config::ServerConfig;
use crate::filter::UploadFilter;
use crate::hooks::{NoOpHook, UploadHook};

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: ContentStore,
    pub config: Arc<ServerConfig>,
    pub filter: Arc<UploadFilter>,
    pub liaison: Arc<dyn LiaisonProvider>,
    pub hook: Arc<dyn UploadHook>,
}

impl AppState {
    pub fn new(store: ContentStore, config: ServerConfig) -> Self {
        let filter = UploadFilter::new(config.upload.clone());
        Self {
            store,
            config: Arc::new(config),
            filter: Arc::new(filter),
            liaison: Arc::new(AllowAllLiaison),
            hook: Arc::new(NoOpHook),
        }
    }

    pub fn with_liaison(mut self, liaison: Arc<dyn LiaisonProvider>) -> Self {
        self.liaison = liaison;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn UploadHook>) -> Self {
        self.hook = hook;
        self
    }
}
