// ============================
// peerlink-backend-lib/src/presence.rs
// ============================
//! Membership notifications and lobby occupancy pushes.
use peerlink_common::{ServerMessage, UserSummary};

use crate::connection::{Connection, Connections};
use crate::directory::RoomDirectory;

/// Send `message` to every open member of `room_id` except `exclude_user`
fn broadcast_room(
    directory: &RoomDirectory,
    connections: &Connections,
    room_id: &str,
    message: &ServerMessage,
    exclude_user: Option<&str>,
) {
    for (user_id, member) in directory.members(room_id) {
        if exclude_user == Some(user_id.as_str()) {
            continue;
        }
        if let Some(conn) = connections.get(&member.connection) {
            if conn.is_open() {
                conn.send_json(message);
            }
        }
    }
}

/// Roster to the joiner, `user-joined` to everyone else in the room
pub fn announce_join(
    directory: &RoomDirectory,
    connections: &Connections,
    joiner: &Connection,
    roster: Vec<UserSummary>,
) {
    let Some(membership) = &joiner.membership else {
        return;
    };

    joiner.send_json(&ServerMessage::Users { users: roster });

    let joined = ServerMessage::UserJoined {
        user_id: membership.user_id.clone(),
        username: membership.username.clone(),
    };
    broadcast_room(
        directory,
        connections,
        &membership.room_id,
        &joined,
        Some(&membership.user_id),
    );
}

/// `user-left` to the remaining members; nothing if the room is gone
pub fn announce_leave(
    directory: &RoomDirectory,
    connections: &Connections,
    room_id: &str,
    user_id: &str,
    exclude_user: Option<&str>,
) {
    if !directory.contains_room(room_id) {
        return;
    }

    let left = ServerMessage::UserLeft {
        user_id: user_id.to_string(),
    };
    broadcast_room(directory, connections, room_id, &left, exclude_user);
}

pub fn room_counts(directory: &RoomDirectory) -> ServerMessage {
    ServerMessage::RoomCounts {
        counts: directory.tracked_counts(),
    }
}

/// Push the full tracked-room table to every connection that is in no room
pub fn broadcast_room_counts(directory: &RoomDirectory, connections: &Connections) {
    let message = room_counts(directory);
    for conn in connections.values() {
        if !conn.in_room() && conn.is_open() {
            conn.send_json(&message);
        }
    }
}
