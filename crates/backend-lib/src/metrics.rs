// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const PRESENCE_JOIN: &str = "presence.join";
pub const PRESENCE_JOIN_REJECTED: &str = "presence.join_rejected";
pub const PRESENCE_LEAVE: &str = "presence.leave";
pub const PRESENCE_CONNECTIONS: &str = "presence.connections";
pub const PRESENCE_SESSIONS: &str = "presence.sessions";
pub const HUB_DELIVERY_DROPPED: &str = "hub.delivery_dropped";
