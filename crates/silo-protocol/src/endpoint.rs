/// Version of the peer wire protocol (handshake and framing).
pub const PROTOCOL_VERSION: u32 = 1;

/// HTTP endpoint paths served by a storage node.
pub mod endpoints {
    /// `GET`/`HEAD`/`PUT` an asset by content id. The trailing name is
    /// only used for `Content-Disposition`.
    pub const ASSET: &str = "/asset/:id/:name";
    pub const HEALTH: &str = "/v1/health";
    pub const INFO: &str = "/v1/info";

    /// Concrete asset path for a content id and file name.
    pub fn asset_path(id: &str, name: &str) -> String {
        format!("/asset/{id}/{name}")
    }
}

/// Health check response.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: u32,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
