use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use silo_store::StoreConfig;

use crate::error::{ServerError, ServerResult};
use crate::filter::UploadFilterConfig;

/// Node configuration, usually read from a TOML file. Every field has a
/// default, so an empty file is a valid config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Where peers connect for the handshake and content sync. No peer
    /// listener when unset.
    pub peer_addr: Option<SocketAddr>,
    pub storage_root: PathBuf,
    /// Hex-encoded identity key. An ephemeral key is generated if unset.
    pub keypair_path: Option<PathBuf>,
    /// Seconds allowed for each object backend call.
    pub backend_timeout: u64,
    /// `false` runs the node in anonymous mode: downloads only.
    pub allow_uploads: bool,
    /// Concurrent peer connections.
    pub max_connections: usize,
    pub upload: UploadFilterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
            peer_addr: None,
            storage_root: PathBuf::from("./silo-data"),
            keypair_path: None,
            backend_timeout: 30,
            allow_uploads: true,
            max_connections: 256,
            upload: UploadFilterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.storage_root.join("objects")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_root.join("uploads")
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            timeout: self.backend_timeout(),
            staging_dir: Some(self.uploads_dir()),
            ..StoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(c.backend_timeout(), Duration::from_secs(30));
        assert!(c.allow_uploads);
        assert!(c.peer_addr.is_none());
        assert_eq!(c.upload.accept, vec!["*/*".to_string()]);
    }

    #[test]
    fn empty_toml_is_default() {
        let c = ServerConfig::from_toml("").unwrap();
        assert_eq!(c.max_connections, 256);
    }

    #[test]
    fn partial_toml_overrides() {
        let c = ServerConfig::from_toml(
            r#"
            bind_addr = "0.0.0.0:8080"
            peer_addr = "0.0.0.0:8081"
            storage_root = "/var/lib/silo"
            backend_timeout = 5
            allow_uploads = false

            [upload]
            max_size = 1048576
            accept = ["image/*", "video/mp4"]
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 8080);
        assert_eq!(c.peer_addr.map(|a| a.port()), Some(8081));
        assert!(!c.allow_uploads);
        assert_eq!(c.upload.max_size, Some(1024 * 1024));
        assert!(c.upload.reject.is_empty());
        assert_eq!(c.store_config().timeout, Duration::from_secs(5));
        assert_eq!(c.store_config().staging_dir, Some(PathBuf::from("/var/lib/silo/uploads")));
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(ServerConfig::from_toml("bind_addr = 7"), Err(ServerError::Config(_))));
        assert!(matches!(ServerConfig::load("/nonexistent/silo.toml"), Err(ServerError::Config(_))));
    }
}
