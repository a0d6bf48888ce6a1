use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_LENGTH, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Json, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use silo_protocol::HealthResponse;
use silo_range::{RangeSender, RangeSet, SendOptions};
use silo_store::{ContentObject, FileInfo, WriteSession};
use silo_types::ContentId;
use tracing::{debug, info, warn};

use crate::auth::UploadGrant;
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AssetQuery {
    /// Present (with any value, or none) to serve as an attachment.
    pub download: Option<String>,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

pub async fn info_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "silo-server",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": silo_protocol::PROTOCOL_VERSION,
        "anonymous": !state.config.allow_uploads,
    }))
}

/// `GET /asset/:id/:name`, honoring `Range`.
pub async fn get_asset(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Query(query): Query<AssetQuery>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let id = parse_content_id(&id)?;
    let ranges = requested_ranges(&headers);
    serve_asset(&state, &id, &name, query.download.is_some(), ranges).await
}

/// `HEAD /asset/:id/:name`: the headers of a full `GET`.
pub async fn head_asset(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Query(query): Query<AssetQuery>,
) -> ServerResult<Response> {
    let id = parse_content_id(&id)?;
    let mut response = serve_asset(&state, &id, &name, query.download.is_some(), None).await?;
    *response.body_mut() = Body::empty();
    Ok(response)
}

async fn serve_asset(
    state: &AppState,
    id: &ContentId,
    name: &str,
    download: bool,
    ranges: Option<RangeSet>,
) -> ServerResult<Response> {
    let session = state.store.open_read(id, None).await?;
    let size = match state.store.size(id, None).await {
        Ok(size) => Some(size),
        Err(err) => {
            debug!(content_id = %id, error = %err, "size unknown, serving without length");
            None
        }
    };
    let info = session.file_info().clone();
    let opts = SendOptions {
        name: attachment_name(name, &info, download),
        content_type: info.mime_type,
        size,
        ranges,
        download,
    };

    let sent = RangeSender::new(opts).send(session.into_io_stream()).await;
    if let Some(err) = &sent.error {
        warn!(content_id = %id, error = %err, "asset read failed");
    }
    debug!(content_id = %id, status = sent.status.as_u16(), "serving asset");
    let mut response = Response::new(Body::from_stream(sent.body));
    *response.status_mut() = sent.status;
    *response.headers_mut() = sent.headers;
    Ok(response)
}

/// A malformed or unreadable `Range` is ignored and the full body served.
fn requested_ranges(headers: &HeaderMap) -> Option<RangeSet> {
    let raw = headers.get(RANGE)?.to_str().ok()?;
    match RangeSet::parse(raw) {
        Ok(set) => Some(set),
        Err(err) => {
            debug!(range = raw, error = %err, "ignoring Range header");
            None
        }
    }
}

/// Downloads get the sniffed extension when the name has none.
fn attachment_name(name: &str, info: &FileInfo, download: bool) -> String {
    if download && FsPath::new(name).extension().is_none() {
        format!("{name}.{}", info.extension)
    } else {
        name.to_string()
    }
}

fn parse_content_id(raw: &str) -> ServerResult<ContentId> {
    ContentId::new(raw).map_err(|_| ServerError::rejected(StatusCode::BAD_REQUEST, "Invalid content id"))
}

/// `PUT /asset/:id/:name`: stage, screen, commit.
///
/// The body is refused before any bytes are read if the node is
/// anonymous, is not the liaison for the content, or the declared
/// length is wrong. The sniffed type is screened as soon as it is known;
/// rejected uploads are cleaned up and never reach the backend.
pub async fn put_asset(
    State(state): State<AppState>,
    Path((id, _name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<Json<Value>> {
    if !state.config.allow_uploads {
        return Err(ServerError::rejected(
            StatusCode::BAD_REQUEST,
            "Uploads Not Permitted in Anonymous Mode",
        ));
    }
    let id = parse_content_id(&id)?;
    let grant = state.liaison.authorize_upload(&id).await.map_err(|err| match err {
        rejected @ ServerError::Rejected { .. } => rejected,
        other => {
            warn!(content_id = %id, error = %other, "liaison check failed");
            ServerError::rejected(StatusCode::FORBIDDEN, "Upload not authorized")
        }
    })?;

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    state.filter.check_length(content_length)?;
    if grant.expected_size.is_some() && grant.expected_size != content_length {
        return Err(ServerError::rejected(
            StatusCode::FORBIDDEN,
            "Content Length does not match expected size of content",
        ));
    }

    let mut upload = state.store.open_write(&id)?;
    let result = receive(&state, &mut upload, &grant, body).await;
    upload.cleanup();
    let object = result?;

    state.hook.post_commit(&object).await?;
    info!(
        content_id = %object.id,
        backend_id = %object.backend_id.short_hex(),
        mime = %object.info.mime_type,
        size = object.size,
        "asset uploaded"
    );
    Ok(Json(json!({ "message": "Asset uploaded." })))
}

async fn receive(
    state: &AppState,
    upload: &mut WriteSession,
    grant: &UploadGrant,
    body: Body,
) -> ServerResult<ContentObject> {
    let mut chunks = body.into_data_stream();
    let mut screened = false;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| {
            debug!(error = %err, "request body failed");
            ServerError::rejected(StatusCode::BAD_REQUEST, "Failed to read request body")
        })?;
        if let Some(info) = upload.write(&chunk).await? {
            screen(state, upload.content_id(), &info).await?;
            screened = true;
        }
    }
    let info = upload.finish().await?;
    if !screened {
        screen(state, upload.content_id(), &info).await?;
    }

    let object = upload.commit().await?;
    if let Some(expected) = grant.expected_backend_id {
        if object.backend_id != expected {
            notify_rejected(state, &object.id, "backend id mismatch").await;
            return Err(ServerError::rejected(
                StatusCode::BAD_REQUEST,
                "Uploaded content doesn't match expected hash",
            ));
        }
    }
    Ok(object)
}

async fn screen(state: &AppState, id: &ContentId, info: &FileInfo) -> ServerResult<()> {
    if let Err(err) = state.filter.check_mime(&info.mime_type) {
        notify_rejected(state, id, &err.public_message()).await;
        return Err(err);
    }
    Ok(())
}

async fn notify_rejected(state: &AppState, id: &ContentId, reason: &str) {
    if let Err(err) = state.hook.rejected(id, reason).await {
        warn!(content_id = %id, error = %err, "rejection hook failed");
    }
}
