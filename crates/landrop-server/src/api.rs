use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use landrop_shared::constants::{
    HEADER_FILENAME, HEADER_RECEIVER_ID, HEADER_RELATIVE_PATH, HEADER_RETRY_COUNT,
    HEADER_SENDER_ID, UPLOAD_IDLE_TIMEOUT,
};
use landrop_shared::types::{DeviceId, Transfer, TransferId, TransferStatus};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::rate_limit::{throttle_middleware, IpThrottle};
use crate::relay::RelayEntry;
use crate::transfers::TransferPatch;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub throttle: IpThrottle,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_upload_size.min(usize::MAX as u64) as usize;

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/api/devices", get(list_devices))
        .route("/api/transfers/{device_id}", get(transfer_inventory))
        .route("/api/transfer/{transfer_id}/upload", post(relay_upload))
        .route("/api/transfer/{transfer_id}/download", get(relay_download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.throttle.clone(),
            throttle_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
}

#[derive(Serialize)]
struct InventoryResponse {
    active: Vec<Transfer>,
    history: Vec<Transfer>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| hub.run_session(socket))
}

async fn list_devices(State(state): State<AppState>) -> Json<Vec<landrop_shared::types::Device>> {
    Json(state.hub.registry.list_reachable(None).await)
}

async fn transfer_inventory(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<InventoryResponse> {
    let device = DeviceId(device_id);
    Json(InventoryResponse {
        active: state.hub.store.active_for(&device).await,
        history: state.hub.store.history_for(&device, None).await,
    })
}

/// Percent-decoded header value, when present.
fn decoded_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(name)?.to_str().ok()?;
    Some(percent_decode_str(raw).decode_utf8_lossy().into_owned())
}

fn plain_header(headers: &HeaderMap, name: &str) -> Option<String> {
    Some(headers.get(name)?.to_str().ok()?.to_string())
}

/// `POST /api/transfer/{id}/upload`: the relay fallback path.
///
/// Idempotent per transfer id: a retry after a completed upload succeeds
/// immediately without reading the body. The body is streamed into memory
/// under the configured cap, with a 30 s inactivity deadline so a stalled
/// sender cannot pin the slot.
async fn relay_upload(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, ServerError> {
    let id = TransferId(transfer_id);

    if state.hub.relay.has_payload(&id).await {
        debug!(transfer = %id, "Upload already processed, replying idempotently");
        return Ok(Json(UploadResponse { success: true }));
    }

    let file_name = decoded_header(&headers, HEADER_FILENAME)
        .ok_or_else(|| ServerError::BadRequest(format!("missing {HEADER_FILENAME} header")))?;
    let file_type = plain_header(&headers, header::CONTENT_TYPE.as_str())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let relative_path = decoded_header(&headers, HEADER_RELATIVE_PATH);
    let retry_count = plain_header(&headers, HEADER_RETRY_COUNT);

    let payload = read_body_capped(body, state.config.max_upload_size).await?;
    info!(
        transfer = %id,
        size = payload.len(),
        retry = retry_count.as_deref().unwrap_or("0"),
        "Relay upload received"
    );

    // Folder transfers may hit the relay without a signaling offer; the
    // sender/receiver headers let the hub create the record. Download
    // stays gated on the receiver's accept either way.
    let transfer = match state.hub.store.get(&id).await {
        Some(t) => t,
        None => {
            let sender = plain_header(&headers, HEADER_SENDER_ID)
                .ok_or_else(|| ServerError::TransferNotFound(id.clone()))?;
            let receiver = plain_header(&headers, HEADER_RECEIVER_ID)
                .ok_or_else(|| ServerError::TransferNotFound(id.clone()))?;
            state
                .hub
                .store
                .create(Transfer {
                    id: id.clone(),
                    file_name: file_name.clone(),
                    file_size: payload.len() as u64,
                    file_type: file_type.clone(),
                    sender_id: DeviceId(sender),
                    receiver_id: DeviceId(receiver),
                    status: TransferStatus::Pending,
                    progress: 0,
                    created_at: Utc::now(),
                    completed_at: None,
                })
                .await?
        }
    };

    state
        .hub
        .relay
        .store(
            id.clone(),
            RelayEntry::new(payload, file_name, file_type, relative_path),
        )
        .await;

    if let Err(err) = state
        .hub
        .store
        .update(
            &id,
            TransferPatch {
                status: Some(TransferStatus::Completed),
                progress: Some(100),
            },
        )
        .await
    {
        // A record already completed through signaling is fine; anything
        // else is worth a log line but the payload is parked regardless.
        debug!(transfer = %id, error = %err, "Upload finished against settled record");
    }

    state
        .hub
        .notify_transfer_complete(&transfer.receiver_id, &id)
        .await;

    Ok(Json(UploadResponse { success: true }))
}

/// Stream the body into memory, enforcing the size cap and the per-frame
/// inactivity deadline.
async fn read_body_capped(body: Body, max: u64) -> Result<Bytes, ServerError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    loop {
        let frame = tokio::time::timeout(UPLOAD_IDLE_TIMEOUT, stream.next()).await;
        match frame {
            Err(_) => return Err(ServerError::UploadTimeout),
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                warn!(error = %err, "Upload body aborted");
                return Err(ServerError::BadRequest("upload aborted".into()));
            }
            Ok(Some(Ok(chunk))) => {
                if buf.len() as u64 + chunk.len() as u64 > max {
                    return Err(ServerError::PayloadTooLarge {
                        size: buf.len() as u64 + chunk.len() as u64,
                        max,
                    });
                }
                buf.extend_from_slice(&chunk);
            }
        }
    }

    Ok(buf.freeze())
}

/// `GET /api/transfer/{id}/download`: authorized receivers pull the
/// relayed payload; the entry evaporates 60 s after the response begins.
async fn relay_download(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
) -> Result<Response, ServerError> {
    let id = TransferId(transfer_id);
    let entry = state.hub.relay.open_download(&id).await?;

    info!(transfer = %id, size = entry.payload.len(), "Relay download started");

    let disposition = format!("attachment; filename=\"{}\"", entry.file_name.replace('"', ""));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, entry.file_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, entry.payload.len())
        .body(Body::from(entry.payload))
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(response)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting hub HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_body_respects_cap() {
        let body = Body::from(vec![0u8; 2048]);
        let err = read_body_capped(body, 1024).await;
        assert!(matches!(err, Err(ServerError::PayloadTooLarge { .. })));

        let body = Body::from(vec![0u8; 512]);
        let data = read_body_capped(body, 1024).await.unwrap();
        assert_eq!(data.len(), 512);
    }

    #[test]
    fn test_decoded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-filename", "my%20file%20%282%29.txt".parse().unwrap());
        assert_eq!(
            decoded_header(&headers, HEADER_FILENAME).unwrap(),
            "my file (2).txt"
        );
        assert!(decoded_header(&headers, HEADER_RELATIVE_PATH).is_none());
    }
}
