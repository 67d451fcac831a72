// ============================
// peerlink-backend-lib/src/directory.rs
// ============================
//! Room directory: room id to members, created lazily and removed as soon
//! as the last member leaves.
use std::collections::{BTreeMap, HashMap};

use peerlink_common::{RoomId, UserId, UserSummary};

use crate::connection::ConnectionId;

/// A registered room member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub connection: ConnectionId,
    pub username: String,
}

#[derive(Debug, Default)]
struct Room {
    members: HashMap<UserId, Member>,
}

/// Result of registering a member
#[derive(Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Every other member, sorted by id
    pub roster: Vec<UserSummary>,
    /// Connection that held the same user id before and was replaced
    pub superseded: Option<ConnectionId>,
}

/// Result of removing a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The entry did not exist or belongs to another connection
    NotMember,
    /// The room became empty and was deleted
    RoomClosed,
    /// The room still has this many members
    Remaining(usize),
}

impl LeaveOutcome {
    pub fn removed(self) -> bool {
        self != LeaveOutcome::NotMember
    }
}

/// In-memory room registry plus the fixed set of tracked rooms
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
    tracked: Vec<RoomId>,
}

impl RoomDirectory {
    pub fn new(tracked: Vec<RoomId>) -> Self {
        Self {
            rooms: HashMap::new(),
            tracked,
        }
    }

    /// Register `connection` as `user_id` in `room_id`, creating the room if
    /// needed. An existing entry for the same user id is replaced and its
    /// connection reported as superseded.
    pub fn join(
        &mut self,
        room_id: &str,
        user_id: &str,
        username: &str,
        connection: ConnectionId,
    ) -> JoinOutcome {
        let room = self.rooms.entry(room_id.to_string()).or_default();

        let superseded = room
            .members
            .insert(
                user_id.to_string(),
                Member {
                    connection,
                    username: username.to_string(),
                },
            )
            .map(|previous| previous.connection)
            .filter(|previous| *previous != connection);

        let mut roster: Vec<UserSummary> = room
            .members
            .iter()
            .filter(|(id, _)| id.as_str() != user_id)
            .map(|(id, member)| UserSummary {
                id: id.clone(),
                username: member.username.clone(),
            })
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));

        JoinOutcome { roster, superseded }
    }

    /// Remove `user_id` from `room_id` if it is still registered to
    /// `connection`; deletes the room when it becomes empty.
    pub fn leave(&mut self, room_id: &str, user_id: &str, connection: ConnectionId) -> LeaveOutcome {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return LeaveOutcome::NotMember;
        };

        match room.members.get(user_id) {
            Some(member) if member.connection == connection => {},
            _ => return LeaveOutcome::NotMember,
        }

        room.members.remove(user_id);
        if room.members.is_empty() {
            self.rooms.remove(room_id);
            LeaveOutcome::RoomClosed
        } else {
            LeaveOutcome::Remaining(room.members.len())
        }
    }

    /// Connection currently registered as `target` in `room_id`
    pub fn route(&self, room_id: &str, target: &str) -> Option<ConnectionId> {
        self.rooms
            .get(room_id)?
            .members
            .get(target)
            .map(|member| member.connection)
    }

    /// Members of `room_id`; empty for unknown rooms
    pub fn members<'a>(&'a self, room_id: &str) -> impl Iterator<Item = (&'a UserId, &'a Member)> {
        self.rooms
            .get(room_id)
            .into_iter()
            .flat_map(|room| room.members.iter())
    }

    pub fn is_tracked(&self, room_id: &str) -> bool {
        self.tracked.iter().any(|tracked| tracked == room_id)
    }

    pub fn occupancy(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.members.len())
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Occupancy of every tracked room, absent rooms counted as zero
    pub fn tracked_counts(&self) -> BTreeMap<RoomId, usize> {
        self.tracked
            .iter()
            .map(|room_id| (room_id.clone(), self.occupancy(room_id)))
            .collect()
    }
}
