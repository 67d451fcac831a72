// ============================
// peerlink-backend-lib/src/lib.rs
// ============================
//! Core functionality for the `PeerLink` WebSocket signaling server.
//!
//! Browser peers connect over `/ws`, gather in rooms and exchange WebRTC
//! handshake payloads through the server until their direct connection is
//! up. The [`hub`] owns all room state; [`ws_router`] is the transport edge.

pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod metrics;
pub mod presence;
pub mod signaling;
pub mod validation;
pub mod ws_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::AppError;
use crate::hub::HubHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the signaling hub
    pub hub: HubHandle,
    /// Settings the server was started with
    pub settings: Arc<Settings>,
    /// Cancelled once on shutdown; every connection holds a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Validate `settings`, spawn the hub and the liveness monitor
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;

        let shutdown = CancellationToken::new();
        let (hub, _hub_task) = hub::spawn_hub(settings.tracked_rooms.clone(), shutdown.clone());
        liveness::spawn_monitor(hub.clone(), settings.heartbeat_interval(), shutdown.clone());

        tracing::info!(
            tracked_rooms = ?settings.tracked_rooms,
            heartbeat_secs = settings.heartbeat_interval_secs,
            access_gated = settings.access_gated(),
            "signaling core started"
        );

        Ok(Self {
            hub,
            settings: Arc::new(settings),
            shutdown,
        })
    }
}

/// Serve the application on `listener` until the shutdown token is cancelled
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), AppError> {
    let shutdown = state.shutdown.clone();
    let app = ws_router::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}
