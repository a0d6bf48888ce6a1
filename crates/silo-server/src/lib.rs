//! HTTP and peer server for the Silo storage node.
//!
//! Serves assets by content id with byte-range support, accepts uploads
//! through a filter and liaison check before committing them to the
//! content store, and (optionally) listens for authenticated peers that
//! announce content to replicate.

pub mod auth;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod hooks;
pub mod peer;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{AllowAllLiaison, LiaisonProvider, StaticLiaison, UploadGrant};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use filter::{UploadFilter, UploadFilterConfig};
pub use hooks::{NoOpHook, UploadHook};
pub use server::SiloServer;
pub use state::AppState;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{Body, Bytes};
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
    use axum::http::{HeaderMap, Method, Request, StatusCode};
    use axum::Router;
    use silo_store::{ContentObject, ContentStore, InMemoryBackend};
    use silo_types::{BackendId, ContentId};
    use tower::util::ServiceExt;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

    #[derive(Default)]
    struct RecordingHook {
        committed: Mutex<Vec<ContentObject>>,
        rejected: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UploadHook for RecordingHook {
        async fn post_commit(&self, object: &ContentObject) -> ServerResult<()> {
            self.committed.lock().unwrap().push(object.clone());
            Ok(())
        }

        async fn rejected(&self, id: &ContentId, _reason: &str) -> ServerResult<()> {
            self.rejected.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    struct Node {
        backend: Arc<InMemoryBackend>,
        hook: Arc<RecordingHook>,
        state: AppState,
    }

    impl Node {
        fn new(config: ServerConfig) -> Self {
            let backend = Arc::new(InMemoryBackend::new().with_chunk_size(4));
            let hook = Arc::new(RecordingHook::default());
            let state = AppState::new(ContentStore::new(backend.clone()), config).with_hook(hook.clone());
            Self { backend, hook, state }
        }

        fn app(&self) -> Router {
            router::build_router(self.state.clone())
        }

        fn hello(&self) -> String {
            self.backend.insert(&b"Hello, world!"[..]).to_hex()
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn put(uri: &str, data: &[u8]) -> Request<Body> {
        Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(CONTENT_LENGTH, data.len())
            .body(Body::from(data.to_vec()))
            .unwrap()
    }

    fn message(body: &Bytes) -> String {
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        json["message"].as_str().unwrap().to_string()
    }

    fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> &'a str {
        headers.get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn health_and_info() {
        let node = Node::new(ServerConfig::default());
        let (status, _, _) = send(node.app(), get("/v1/health")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = send(node.app(), get("/v1/info")).await;
        assert_eq!(status, StatusCode::OK);
        let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["name"], "silo-server");
        assert_eq!(info["anonymous"], false);
    }

    #[tokio::test]
    async fn upload_then_download() {
        let node = Node::new(ServerConfig::default());
        let (status, _, body) = send(node.app(), put("/asset/upload-1/pixel", PNG)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(message(&body), "Asset uploaded.");

        let committed = node.hook.committed.lock().unwrap().clone();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].info.mime_type, "image/png");
        let backend_id = BackendId::digest(PNG);
        assert_eq!(committed[0].backend_id, backend_id);
        assert!(node.backend.is_pinned(&backend_id));

        let uri = format!("/asset/{}/pixel", backend_id.to_hex());
        let (status, headers, body) = send(node.app(), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header(&headers, CONTENT_TYPE), "image/png");
        assert_eq!(header(&headers, CONTENT_LENGTH), PNG.len().to_string());
        assert_eq!(&body[..], PNG);
    }

    #[tokio::test]
    async fn single_range() {
        let node = Node::new(ServerConfig::default());
        let id = node.hello();
        let req = Request::builder()
            .uri(format!("/asset/{id}/hello.txt"))
            .header(RANGE, "bytes=1-11")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(node.app(), req).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&headers, CONTENT_RANGE), "bytes 1-11/13");
        assert_eq!(header(&headers, CONTENT_LENGTH), "11");
        assert_eq!(&body[..], b"ello, world");
    }

    #[tokio::test]
    async fn multiple_ranges() {
        let node = Node::new(ServerConfig::default());
        let id = node.hello();
        let req = Request::builder()
            .uri(format!("/asset/{id}/hello.txt"))
            .header(RANGE, "bytes=5-7,1-3")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(node.app(), req).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert!(header(&headers, CONTENT_TYPE).starts_with("multipart/byteranges; boundary="));
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Content-Range: bytes 1-3/13"));
        assert!(text.contains("Content-Range: bytes 5-7/13"));
        assert!(text.contains("ell"));
        assert!(text.contains(", w"));
    }

    #[tokio::test]
    async fn malformed_range_serves_everything() {
        let node = Node::new(ServerConfig::default());
        let id = node.hello();
        let req = Request::builder()
            .uri(format!("/asset/{id}/hello.txt"))
            .header(RANGE, "bytes=oops")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(node.app(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"Hello, world!");
    }

    #[tokio::test]
    async fn head_has_headers_only() {
        let node = Node::new(ServerConfig::default());
        let id = node.hello();
        let req = Request::builder()
            .method(Method::HEAD)
            .uri(format!("/asset/{id}/hello"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(node.app(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header(&headers, CONTENT_LENGTH), "13");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn download_is_an_attachment() {
        let node = Node::new(ServerConfig::default());
        let id = node.hello();
        let (status, headers, _) = send(node.app(), get(&format!("/asset/{id}/hello?download"))).await;
        assert_eq!(status, StatusCode::OK);
        let disposition = header(&headers, CONTENT_DISPOSITION);
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("hello.bin"));
    }

    #[tokio::test]
    async fn unknown_asset_is_not_found() {
        let node = Node::new(ServerConfig::default());
        let uri = format!("/asset/{}/x", BackendId::digest(b"absent").to_hex());
        let (status, _, body) = send(node.app(), get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message(&body), "Content not found");
    }

    #[tokio::test]
    async fn anonymous_mode_refuses_uploads() {
        let node = Node::new(ServerConfig { allow_uploads: false, ..Default::default() });
        let (status, _, body) = send(node.app(), put("/asset/a/b", b"data")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Uploads Not Permitted in Anonymous Mode");
        assert!(node.backend.is_empty());
    }

    #[tokio::test]
    async fn rejected_type_never_reaches_backend() {
        let mut config = ServerConfig::default();
        config.upload.accept = vec!["image/*".into()];
        let node = Node::new(config);

        let (status, _, _) = send(node.app(), put("/asset/doc-1/notes", b"plain text notes")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(node.backend.is_empty());
        assert_eq!(node.hook.rejected.lock().unwrap().as_slice(), ["doc-1".to_string()]);

        let (status, _, _) = send(node.app(), put("/asset/img-1/pixel", PNG)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn length_policy() {
        let mut config = ServerConfig::default();
        config.upload.max_size = Some(8);
        let node = Node::new(config);

        let (status, _, _) = send(node.app(), put("/asset/a/b", b"way too long")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let unsized_req = Request::builder()
            .method(Method::PUT)
            .uri("/asset/a/b")
            .body(Body::from("tiny"))
            .unwrap();
        let (status, _, _) = send(node.app(), unsized_req).await;
        assert_eq!(status, StatusCode::LENGTH_REQUIRED);
        assert!(node.backend.is_empty());
    }

    #[tokio::test]
    async fn liaison_expectations_enforced() {
        let liaison = Arc::new(StaticLiaison::new());
        let mut node = Node::new(ServerConfig::default());
        node.state = node.state.clone().with_liaison(liaison.clone());

        let (status, _, _) = send(node.app(), put("/asset/unassigned/x", b"data")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let id = ContentId::new("assigned").unwrap();
        liaison.grant(id.clone(), UploadGrant { expected_size: Some(5), expected_backend_id: None });
        let (status, _, body) = send(node.app(), put("/asset/assigned/x", b"not five bytes")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(message(&body), "Content Length does not match expected size of content");

        liaison.grant(
            id.clone(),
            UploadGrant { expected_size: Some(5), expected_backend_id: Some(BackendId::digest(b"other")) },
        );
        let (status, _, body) = send(node.app(), put("/asset/assigned/x", b"hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Uploaded content doesn't match expected hash");
        assert!(node.hook.committed.lock().unwrap().is_empty());

        liaison.grant(
            id,
            UploadGrant { expected_size: Some(5), expected_backend_id: Some(BackendId::digest(b"hello")) },
        );
        let (status, _, _) = send(node.app(), put("/asset/assigned/x", b"hello")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
