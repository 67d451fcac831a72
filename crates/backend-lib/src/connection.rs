// ============================
// peerlink-backend-lib/src/connection.rs
// ============================
//! Per-connection records owned by the hub.
//!
//! The transport (an axum WebSocket) stays in its own tasks; the hub only
//! keeps the outbound queue, the cancellation token and the ephemeral room
//! identity of each connection, keyed by [`ConnectionId`].

use std::collections::HashMap;
use std::fmt;

use metrics::counter;
use peerlink_common::{RoomId, UserId};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::WS_FRAME_DROPPED;

/// Identity of one live duplex channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON frame
    Text(String),
    /// Liveness probe
    Ping,
    /// Close handshake, the writer stops afterwards
    Close,
}

/// Sending half of a connection's outbound queue
pub type OutboundTx = mpsc::Sender<Outbound>;

/// Liveness flag driven by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Answered the last probe (or no probe sent yet)
    Alive,
    /// Probe sent, no answer yet
    Pending,
}

/// Room identity of a joined connection. Room and user are always set together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
}

/// All registered connections
pub type Connections = HashMap<ConnectionId, Connection>;

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    tx: OutboundTx,
    cancel: CancellationToken,
    pub liveness: Liveness,
    pub membership: Option<Membership>,
}

impl Connection {
    /// A freshly registered connection: alive and in no room
    pub fn new(id: ConnectionId, tx: OutboundTx, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            cancel,
            liveness: Liveness::Alive,
            membership: None,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }

    pub fn in_room(&self) -> bool {
        self.membership.is_some()
    }

    /// Queue a frame without waiting. A full or closed queue drops the frame.
    pub fn send(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn = %self.id, "outbound queue full, dropping frame");
                counter!(WS_FRAME_DROPPED).increment(1);
                false
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize `message` and queue it
    pub fn send_json<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Outbound::Text(json)),
            Err(e) => {
                tracing::error!(conn = %self.id, error = %e, "failed to serialize frame");
                false
            },
        }
    }

    /// Ask the writer for a close handshake; terminate outright if the
    /// request cannot be queued.
    pub fn close(&self) {
        if self.tx.try_send(Outbound::Close).is_err() {
            self.terminate();
        }
    }

    /// Tear down both socket tasks immediately
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_skips_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = Connection::new(ConnectionId::new(), tx, CancellationToken::new());

        assert!(conn.send(Outbound::Ping));
        assert!(!conn.send(Outbound::Ping));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_is_not_open() {
        let (tx, rx) = mpsc::channel(4);
        let conn = Connection::new(ConnectionId::new(), tx, CancellationToken::new());
        assert!(conn.is_open());

        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send(Outbound::Ping));
    }

    #[test]
    fn test_close_falls_back_to_terminate() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let conn = Connection::new(ConnectionId::new(), tx, cancel.clone());

        drop(rx);
        conn.close();
        assert!(cancel.is_cancelled());
    }
}
