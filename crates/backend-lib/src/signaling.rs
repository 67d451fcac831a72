// ============================
// peerlink-backend-lib/src/signaling.rs
// ============================
//! Point-to-point relay of handshake payloads inside a room.
use metrics::counter;
use peerlink_common::{RelayedSignal, Signal, SignalKind};

use crate::connection::{Connection, Connections};
use crate::directory::RoomDirectory;
use crate::metrics::{SIGNAL_DROPPED, SIGNAL_RELAYED};

/// What happened to a relayed payload. Every variant except `Delivered` is a
/// silent drop; the sender is never told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    SenderNotInRoom,
    TargetAbsent,
    TargetClosed,
}

/// Forward `signal` from `sender` to its target in the sender's room,
/// annotated with the sender's user id.
pub fn relay(
    directory: &RoomDirectory,
    connections: &Connections,
    sender: &Connection,
    kind: SignalKind,
    signal: Signal,
) -> RelayOutcome {
    let outcome = forward(directory, connections, sender, kind, signal);

    if outcome == RelayOutcome::Delivered {
        counter!(SIGNAL_RELAYED).increment(1);
    } else {
        tracing::debug!(conn = %sender.id, kind = kind.as_str(), ?outcome, "signal dropped");
        counter!(SIGNAL_DROPPED).increment(1);
    }

    outcome
}

fn forward(
    directory: &RoomDirectory,
    connections: &Connections,
    sender: &Connection,
    kind: SignalKind,
    signal: Signal,
) -> RelayOutcome {
    let Some(membership) = &sender.membership else {
        return RelayOutcome::SenderNotInRoom;
    };

    let Some(target) = directory
        .route(&membership.room_id, &signal.target_id)
        .and_then(|id| connections.get(&id))
    else {
        return RelayOutcome::TargetAbsent;
    };

    if !target.is_open() {
        return RelayOutcome::TargetClosed;
    }

    let relayed = RelayedSignal::new(kind, signal, membership.user_id.clone());
    if target.send_json(&relayed) {
        RelayOutcome::Delivered
    } else {
        RelayOutcome::TargetClosed
    }
}
