// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_MALFORMED_FRAME: &str = "ws.malformed_frame";
pub const WS_FRAME_DROPPED: &str = "ws.frame_dropped";
pub const ROOM_JOINED: &str = "room.joined";
pub const ROOM_LEFT: &str = "room.left";
pub const ROOM_SUPERSEDED: &str = "room.superseded";
pub const ROOM_ACTIVE: &str = "room.active";
pub const SIGNAL_RELAYED: &str = "signal.relayed";
pub const SIGNAL_DROPPED: &str = "signal.dropped";
pub const LIVENESS_TIMEOUT: &str = "liveness.timeout";
