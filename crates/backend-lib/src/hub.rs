// ============================
// peerlink-backend-lib/src/hub.rs
// ============================
//! The signaling hub: a single actor owning the room directory and every
//! connection record. All mutations arrive as [`HubCommand`]s on one
//! channel and are applied one at a time, so join, leave, relay and the
//! liveness sweep never interleave.
use std::collections::BTreeMap;

use metrics::{counter, gauge};
use peerlink_common::{ClientMessage, RoomId, Signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionId, Connections, Liveness, Membership, OutboundTx};
use crate::directory::{LeaveOutcome, RoomDirectory};
use crate::error::AppError;
use crate::metrics::{
    LIVENESS_TIMEOUT, ROOM_ACTIVE, ROOM_JOINED, ROOM_LEFT, ROOM_SUPERSEDED, WS_ACTIVE,
};
use crate::{liveness, presence, signaling, validation};

/// Message sent *into* the hub
#[derive(Debug)]
pub enum HubCommand {
    /// A new transport was accepted
    Register {
        id: ConnectionId,
        tx: OutboundTx,
        cancel: CancellationToken,
    },
    /// A decoded client frame
    Message { id: ConnectionId, message: ClientMessage },
    /// Probe acknowledgment
    Pong { id: ConnectionId },
    /// The transport closed or failed
    Disconnect { id: ConnectionId },
    /// Liveness monitor tick
    Sweep,
    /// Occupancy of the tracked rooms
    RoomCounts {
        resp_tx: oneshot::Sender<BTreeMap<RoomId, usize>>,
    },
}

/// Handle that other components keep to talk to the hub
#[derive(Clone, Debug)]
pub struct HubHandle {
    pub cmd_tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn register(
        &self,
        id: ConnectionId,
        tx: OutboundTx,
        cancel: CancellationToken,
    ) -> Result<(), AppError> {
        self.cmd_tx.send(HubCommand::Register { id, tx, cancel })?;
        Ok(())
    }

    pub fn dispatch(&self, id: ConnectionId, message: ClientMessage) -> Result<(), AppError> {
        self.cmd_tx.send(HubCommand::Message { id, message })?;
        Ok(())
    }

    pub fn pong(&self, id: ConnectionId) -> Result<(), AppError> {
        self.cmd_tx.send(HubCommand::Pong { id })?;
        Ok(())
    }

    pub fn disconnect(&self, id: ConnectionId) -> Result<(), AppError> {
        self.cmd_tx.send(HubCommand::Disconnect { id })?;
        Ok(())
    }

    pub fn sweep(&self) -> Result<(), AppError> {
        self.cmd_tx.send(HubCommand::Sweep)?;
        Ok(())
    }

    /// Current occupancy of every tracked room
    pub async fn room_counts(&self) -> Result<BTreeMap<RoomId, usize>, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(HubCommand::RoomCounts { resp_tx })?;
        Ok(resp_rx.await?)
    }
}

pub struct Hub {
    directory: RoomDirectory,
    connections: Connections,
}

impl Hub {
    pub fn new(tracked_rooms: Vec<RoomId>) -> Self {
        Self {
            directory: RoomDirectory::new(tracked_rooms),
            connections: Connections::new(),
        }
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Apply one command
    pub fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { id, tx, cancel } => self.register(id, tx, cancel),
            HubCommand::Message { id, message } => self.handle_message(id, message),
            HubCommand::Pong { id } => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.liveness = Liveness::Alive;
                }
            },
            HubCommand::Disconnect { id } => self.disconnect(id),
            HubCommand::Sweep => self.sweep(),
            HubCommand::RoomCounts { resp_tx } => {
                let _ = resp_tx.send(self.directory.tracked_counts());
            },
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }

        for conn in self.connections.values() {
            conn.terminate();
        }
        tracing::info!(connections = self.connections.len(), "signaling hub stopped");
    }

    fn register(&mut self, id: ConnectionId, tx: OutboundTx, cancel: CancellationToken) {
        let conn = Connection::new(id, tx, cancel);
        conn.send_json(&presence::room_counts(&self.directory));
        self.connections.insert(id, conn);

        tracing::debug!(conn = %id, "connection registered");
        gauge!(WS_ACTIVE).set(self.connections.len() as f64);
    }

    fn handle_message(&mut self, id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Join {
                room_id,
                user_id,
                username,
            } => self.join(id, room_id, user_id, &username),
            ClientMessage::Offer(signal) => self.relay(id, SignalKind::Offer, signal),
            ClientMessage::Answer(signal) => self.relay(id, SignalKind::Answer, signal),
            ClientMessage::IceCandidate(signal) => {
                self.relay(id, SignalKind::IceCandidate, signal);
            },
            ClientMessage::Leave => {
                let membership = self
                    .connections
                    .get_mut(&id)
                    .and_then(|conn| conn.membership.take());
                if let Some(membership) = membership {
                    self.release(id, &membership);
                }
            },
        }
    }

    fn join(&mut self, id: ConnectionId, room_id: RoomId, user_id: String, username: &str) {
        if let Err(e) = validation::validate_room_id(&room_id)
            .and_then(|_| validation::validate_user_id(&user_id))
        {
            tracing::warn!(conn = %id, error = %e, "ignoring invalid join");
            return;
        }

        // A connection is in at most one room: leave the current one first.
        // The joiner stays off the lobby push until its new membership is set.
        let previous = match self.connections.get_mut(&id) {
            Some(conn) => conn.membership.take(),
            None => return,
        };
        let left_tracked = match previous {
            Some(previous) => self.detach(id, &previous),
            None => false,
        };

        let username = validation::sanitize_username(username);
        let outcome = self.directory.join(&room_id, &user_id, &username, id);

        if let Some(stale) = outcome.superseded {
            self.supersede(stale, &room_id, &user_id);
        }

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        conn.membership = Some(Membership {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            username,
        });

        if let Some(conn) = self.connections.get(&id) {
            presence::announce_join(&self.directory, &self.connections, conn, outcome.roster);
        }

        tracing::info!(
            conn = %id,
            room = %room_id,
            user = %user_id,
            members = self.directory.occupancy(&room_id),
            "user joined room"
        );
        counter!(ROOM_JOINED).increment(1);
        gauge!(ROOM_ACTIVE).set(self.directory.room_count() as f64);

        if left_tracked || self.directory.is_tracked(&room_id) {
            presence::broadcast_room_counts(&self.directory, &self.connections);
        }
    }

    /// Detach and close the connection that previously owned `user_id`
    fn supersede(&mut self, stale: ConnectionId, room_id: &str, user_id: &str) {
        if let Some(old) = self.connections.remove(&stale) {
            old.close();
        }

        presence::announce_leave(&self.directory, &self.connections, room_id, user_id, Some(user_id));

        tracing::info!(conn = %stale, room = %room_id, user = %user_id, "superseded by a newer connection");
        counter!(ROOM_SUPERSEDED).increment(1);
        gauge!(WS_ACTIVE).set(self.connections.len() as f64);
    }

    fn relay(&mut self, id: ConnectionId, kind: SignalKind, signal: Signal) {
        if let Some(sender) = self.connections.get(&id) {
            signaling::relay(&self.directory, &self.connections, sender, kind, signal);
        }
    }

    /// Leave path shared by explicit leave, close and liveness timeout. The
    /// membership has already been taken off the connection record.
    fn release(&mut self, id: ConnectionId, membership: &Membership) {
        if self.detach(id, membership) {
            presence::broadcast_room_counts(&self.directory, &self.connections);
        }
    }

    /// Remove the directory entry and tell the remaining members. Returns
    /// whether a tracked room's occupancy changed; the lobby push is left to
    /// the caller.
    fn detach(&mut self, id: ConnectionId, membership: &Membership) -> bool {
        let outcome = self
            .directory
            .leave(&membership.room_id, &membership.user_id, id);
        if !outcome.removed() {
            return false;
        }

        match outcome {
            LeaveOutcome::RoomClosed => {
                tracing::info!(room = %membership.room_id, "room deleted (empty)");
            },
            LeaveOutcome::Remaining(remaining) => {
                tracing::info!(
                    room = %membership.room_id,
                    user = %membership.user_id,
                    remaining,
                    "user left room"
                );
                presence::announce_leave(
                    &self.directory,
                    &self.connections,
                    &membership.room_id,
                    &membership.user_id,
                    None,
                );
            },
            LeaveOutcome::NotMember => {},
        }

        counter!(ROOM_LEFT).increment(1);
        gauge!(ROOM_ACTIVE).set(self.directory.room_count() as f64);

        self.directory.is_tracked(&membership.room_id)
    }

    fn disconnect(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        if let Some(membership) = conn.membership.take() {
            self.release(id, &membership);
        }
        conn.terminate();

        tracing::debug!(conn = %id, "connection unregistered");
        gauge!(WS_ACTIVE).set(self.connections.len() as f64);
    }

    fn sweep(&mut self) {
        for id in liveness::sweep(&mut self.connections) {
            tracing::info!(conn = %id, "liveness probe unanswered, terminating");
            counter!(LIVENESS_TIMEOUT).increment(1);
            self.disconnect(id);
        }
    }
}

/// Spawn a hub and return its handle
pub fn spawn_hub(tracked_rooms: Vec<RoomId>, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let hub = Hub::new(tracked_rooms);

    let task = tokio::spawn(hub.run(cmd_rx, shutdown));

    (HubHandle { cmd_tx }, task)
}
