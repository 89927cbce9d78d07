// ============================
// presence-backend-lib/src/lib.rs
// ============================
//! Core functionality of the session presence server.
//!
//! Clients join named sessions over a WebSocket and receive live member
//! lists as others join and leave. [`registry`] holds membership,
//! [`protocol`] decides who hears about each change, and
//! [`presence_actor`] serializes all of it onto one task.

pub mod config;
pub mod error;
pub mod metrics;
pub mod presence_actor;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod ws_router;

use crate::config::Settings;
use crate::presence_actor::{spawn_presence_actor, PresenceHandle};
use crate::transport::{ConnectionHub, HubTransport};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings the server was started with
    pub settings: Arc<Settings>,
    /// Entry point to the presence actor
    pub presence: PresenceHandle,
    /// Outbound queues of live WebSocket connections
    pub hub: ConnectionHub,
}

impl AppState {
    /// Create the application state and start the presence actor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(settings: Settings) -> Self {
        let hub = ConnectionHub::new();
        let presence = spawn_presence_actor(HubTransport::new(hub.clone()));

        Self {
            settings: Arc::new(settings),
            presence,
            hub,
        }
    }
}
