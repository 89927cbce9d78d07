// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between presence clients and the server.
//! This module defines the WebSocket protocol messages and supporting types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender name used for every server-authored chat line
pub const ADMIN_SENDER: &str = "admin";

/// Opaque identifier of one live transport connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "msgType")]
pub enum ClientToServer {
    /// Join a session
    /// # Fields
    /// * `display_name` - Name shown to the other members
    /// * `session_id` - Session (room) to join
    Join {
        #[serde(rename = "displayName", alias = "name", default)]
        display_name: String,
        #[serde(rename = "sessionId", alias = "sessionid", default)]
        session_id: String,
    },
}

/// One entry of a presence snapshot
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Member {
    #[serde(rename = "connectionId")]
    pub connection_id: ConnectionId,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Full member list of a session, in join order
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub members: Vec<Member>,
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "msgType")]
pub enum ServerToClient {
    /// Chat line, either private or broadcast to a session
    Message {
        /// Always [`ADMIN_SENDER`] for presence announcements
        sender: String,
        text: String,
    },
    /// Authoritative presence snapshot of a session
    SessionData(SessionSnapshot),
    /// Response to successful join
    JoinAccepted {
        /// Identifier the server assigned to this connection
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    /// Response to failed join
    JoinRejected {
        /// Error kind, e.g. `MissingName`
        error: String,
    },
    /// Error response for malformed messages
    MalformedMessage {
        /// Error description
        err_msg: String,
    },
}

impl ServerToClient {
    /// Server-authored chat line
    pub fn admin(text: impl Into<String>) -> Self {
        ServerToClient::Message {
            sender: ADMIN_SENDER.to_string(),
            text: text.into(),
        }
    }
}
