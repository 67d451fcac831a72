// ============================
// peerlink-backend-lib/src/ws_router.rs
// ============================
//! HTTP router and WebSocket connection handling.
//!
//! Each socket is split into a reader task, which decodes frames and feeds
//! the hub in arrival order, and a writer task draining the connection's
//! outbound queue. Both stop when the connection's cancellation token fires.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use metrics::counter;
use peerlink_common::{ClientMessage, RoomId};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::Instrument;

use crate::connection::{ConnectionId, Outbound};
use crate::error::AppError;
use crate::hub::HubHandle;
use crate::metrics::{WS_CONNECTION, WS_DISCONNECTION, WS_MALFORMED_FRAME};
use crate::validation;
use crate::AppState;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Access code, required when gating is enabled
    pub code: Option<String>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/room-counts", get(room_counts_handler));

    if let Some(dir) = &state.settings.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Occupancy of every tracked room
async fn room_counts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<RoomId, usize>>, AppError> {
    Ok(Json(state.hub.room_counts().await?))
}

/// Handler for WebSocket connections
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    validation::check_access_code(state.settings.access_code.as_deref(), params.code.as_deref())
        .map_err(|e| {
            tracing::warn!(%addr, "rejecting connection: {e}");
            AppError::AccessDenied(e.to_string())
        })?;

    tracing::debug!(%addr, "WebSocket connection attempt");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, addr)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let id = ConnectionId::new();
    let span = tracing::info_span!("conn", %id, %addr);

    async move {
        let (tx, rx) = mpsc::channel(state.settings.outbound_buffer);
        let cancel = state.shutdown.child_token();

        if let Err(e) = state.hub.register(id, tx, cancel.clone()) {
            tracing::error!(error = %e, "failed to register connection");
            return;
        }
        tracing::info!("client connected");
        counter!(WS_CONNECTION).increment(1);

        let (sink, stream) = socket.split();
        let send_task = tokio::spawn(write_frames(sink, rx, cancel.clone()).in_current_span());

        read_frames(stream, id, &state.hub, &cancel).await;

        // Whatever ended the reader, the hub runs the leave path exactly once.
        cancel.cancel();
        let _ = state.hub.disconnect(id);
        let _ = send_task.await;

        tracing::info!("client disconnected");
        counter!(WS_DISCONNECTION).increment(1);
    }
    .instrument(span)
    .await;
}

async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    id: ConnectionId,
    hub: &HubHandle,
    cancel: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if !forward_frame(hub, id, text.as_str()) {
                    break;
                }
            },
            // Binary frames carry the same JSON as text frames.
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    if !forward_frame(hub, id, text) {
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring non-UTF-8 binary frame");
                    counter!(WS_MALFORMED_FRAME).increment(1);
                },
            },
            Some(Ok(Message::Pong(_))) => {
                if hub.pong(id).is_err() {
                    break;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                tracing::warn!(error = %e, "transport error");
                break;
            },
        }
    }
}

/// Decode one JSON frame and hand it to the hub. Malformed frames are
/// logged and dropped; `false` means the hub is gone.
fn forward_frame(hub: &HubHandle, id: ConnectionId, text: &str) -> bool {
    match ClientMessage::from_frame(text) {
        Ok(message) => hub.dispatch(id, message).is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed frame");
            counter!(WS_MALFORMED_FRAME).increment(1);
            true
        },
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = rx.recv() => frame,
        };

        let result = match frame {
            Some(Outbound::Text(text)) => sink.send(Message::Text(text.into())).await,
            Some(Outbound::Ping) => sink.send(Message::Ping(Vec::new().into())).await,
            Some(Outbound::Close) => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            },
            None => break,
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "send failed");
            break;
        }
    }

    // A writer that stops also stops the reader.
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hub::HubCommand;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[test]
    fn test_forward_frame_dispatches_and_skips_malformed() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let hub = HubHandle { cmd_tx };
        let id = ConnectionId::new();

        assert!(forward_frame(&hub, id, "{not json"));
        assert!(forward_frame(&hub, id, r#"{"type":"dance"}"#));
        assert!(cmd_rx.try_recv().is_err());

        assert!(forward_frame(&hub, id, r#"{"type":"leave"}"#));
        assert!(matches!(
            cmd_rx.try_recv(),
            Ok(HubCommand::Message {
                message: ClientMessage::Leave,
                ..
            })
        ));

        drop(cmd_rx);
        assert!(!forward_frame(&hub, id, r#"{"type":"leave"}"#));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = Arc::new(AppState::new(Settings::default()).unwrap());
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_room_counts_endpoint() {
        let state = Arc::new(AppState::new(Settings::default()).unwrap());
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/room-counts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let counts: BTreeMap<String, usize> = serde_json::from_slice(&body).unwrap();
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|count| *count == 0));
    }

    #[tokio::test]
    async fn test_static_dir_is_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>lobby</h1>").unwrap();

        let settings = Settings {
            static_dir: Some(dir.path().to_path_buf()),
            ..Settings::default()
        };
        let app = create_router(Arc::new(AppState::new(settings).unwrap()));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<h1>lobby</h1>");
    }

    #[tokio::test]
    async fn test_unknown_path_without_static_dir() {
        let app = create_router(Arc::new(AppState::new(Settings::default()).unwrap()));

        let response = app
            .oneshot(Request::builder().uri("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
