use std::sync::Arc;

use silo_crypto::{Keypair, PublicKey};
use silo_store::{ContentStore, FsBackend};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::peer::serve_peers;
use crate::router::build_router;
use crate::state::AppState;

/// A storage node: the HTTP asset surface plus, if configured, the peer
/// listener.
pub struct SiloServer {
    state: AppState,
    keypair: Arc<Keypair>,
}

impl SiloServer {
    /// Open the filesystem backend under `storage_root` and load the
    /// node key.
    pub async fn open(config: ServerConfig) -> ServerResult<Self> {
        let backend = FsBackend::open(config.objects_dir()).await?;
        tokio::fs::create_dir_all(config.uploads_dir()).await?;
        let keypair = match &config.keypair_path {
            Some(path) => Keypair::load(path)?,
            None => {
                warn!("no keypair_path configured, using an ephemeral node key");
                Keypair::generate()
            }
        };
        let store = ContentStore::new(Arc::new(backend)).with_config(config.store_config());
        Ok(Self::with_state(AppState::new(store, config), keypair))
    }

    pub fn with_state(state: AppState, keypair: Keypair) -> Self {
        Self { state, keypair: Arc::new(keypair) }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let config = self.state.config.clone();
        if let Some(peer_addr) = config.peer_addr {
            let listener = TcpListener::bind(peer_addr).await?;
            info!(%peer_addr, key = %self.keypair.public_key().short(), "peer listener started");
            let keypair = self.keypair.clone();
            let store = self.state.store.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_peers(listener, keypair, store, config.max_connections).await {
                    warn!(error = %err, "peer listener stopped");
                }
            });
        }

        let app = self.router();
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        info!(addr = %self.state.config.bind_addr, anonymous = !self.state.config.allow_uploads, "silo node listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig { storage_root: dir.path().to_path_buf(), ..Default::default() };
        let server = SiloServer::open(config).await.unwrap();
        assert!(dir.path().join("objects").join("pins").is_dir());
        assert!(dir.path().join("uploads").is_dir());
        let _router = server.router();
    }

    #[tokio::test]
    async fn open_loads_configured_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("node.key");
        let key = Keypair::generate();
        key.save(&key_path).unwrap();

        let config = ServerConfig {
            storage_root: dir.path().join("data"),
            keypair_path: Some(key_path),
            ..Default::default()
        };
        let server = SiloServer::open(config).await.unwrap();
        assert_eq!(server.public_key(), key.public_key());
    }

    #[tokio::test]
    async fn missing_key_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_root: dir.path().to_path_buf(),
            keypair_path: Some(dir.path().join("absent.key")),
            ..Default::default()
        };
        assert!(matches!(SiloServer::open(config).await, Err(ServerError::Crypto(_))));
    }
}
