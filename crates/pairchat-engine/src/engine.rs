use chrono::Utc;
use pairchat_core::{ClientEvent, ConnectionId, ConnectionInfo, EngineError, ServerEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, ActivityRecord};
use crate::matchmaker::{MatchState, Matchmaker};
use crate::names::NameRegistry;
use crate::outbox::Outbox;
use crate::registry::ConnectionRegistry;
use crate::relay::RelayDispatcher;

/// Point-in-time counts for health checks and gauges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub online: usize,
    pub waiting: usize,
    pub sessions: usize,
}

/// All matching and relay state for one server process.
///
/// Owned by a single task; every method runs to completion and returns
/// the deliveries it produced.
#[derive(Debug, Default)]
pub struct ChatEngine {
    registry: ConnectionRegistry,
    names: NameRegistry,
    matchmaker: Matchmaker,
    activity: ActivityLog,
}

impl ChatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activity_capacity(capacity: usize) -> Self {
        Self {
            activity: ActivityLog::new(capacity),
            ..Self::default()
        }
    }

    pub fn connect(&mut self, id: &ConnectionId) -> Result<Outbox, EngineError> {
        self.registry.register(id)?;
        info!(connection_id = %id, online = self.registry.len(), "connection registered");

        let mut out = Outbox::new();
        out.to(
            id,
            ServerEvent::Connected(ConnectionInfo {
                connection_id: id.clone(),
            }),
        );
        out.everyone(ServerEvent::UpdateOnlineUsers(self.registry.len()));
        Ok(out)
    }

    /// Authoritative teardown: queue entry, session, registry record, name.
    pub fn disconnect(&mut self, id: &ConnectionId) -> Outbox {
        let mut out = Outbox::new();
        self.matchmaker.leave(id, &self.registry, &mut out);

        let Some(conn) = self.registry.unregister(id) else {
            debug!(connection_id = %id, "disconnect for unknown connection");
            return out;
        };
        if let Some(name) = &conn.display_name {
            self.names.release(name);
        }
        self.activity
            .record(ActivityRecord::from_connection(conn, Utc::now()));
        info!(connection_id = %id, online = self.registry.len(), "connection removed");

        out.everyone(ServerEvent::UpdateOnlineUsers(self.registry.len()));
        out
    }

    pub fn handle(&mut self, id: &ConnectionId, event: ClientEvent) -> Outbox {
        let mut out = Outbox::new();
        if !self.registry.contains(id) {
            debug!(
                connection_id = %id,
                event = event.name(),
                "event from unknown connection dropped"
            );
            return out;
        }

        let control = match event.into_relay() {
            Ok(relay) => {
                let dispatcher = RelayDispatcher::new(self.matchmaker.sessions());
                if let Some(delivery) = dispatcher.forward(id, relay) {
                    out.push(delivery);
                }
                return out;
            }
            Err(control) => control,
        };

        match control {
            ClientEvent::StartChat => self.matchmaker.request_match(id, &self.registry, &mut out),
            ClientEvent::EndChat => self.matchmaker.end_session(id, &self.registry, &mut out),
            ClientEvent::SetUsername(name) => self.set_username(id, &name),
            other => debug!(connection_id = %id, event = other.name(), "unhandled control event"),
        }
        out
    }

    /// A name is kept once set, and only claimed if no live connection
    /// holds it already.
    fn set_username(&mut self, id: &ConnectionId, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if let Some(existing) = self.registry.get(id).and_then(|c| c.display_name.as_deref()) {
            debug!(connection_id = %id, existing, "display name already set");
            return;
        }
        if !self.names.claim(name) {
            warn!(connection_id = %id, name, "display name already taken");
            return;
        }
        self.registry.set_display_name(id, name);
    }

    pub fn is_name_available(&self, name: &str) -> bool {
        self.names.is_available(name)
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.registry.contains(id)
    }

    pub fn state_of(&self, id: &ConnectionId) -> MatchState {
        self.matchmaker.state_of(id)
    }

    pub fn partner_of(&self, id: &ConnectionId) -> Option<&ConnectionId> {
        self.matchmaker.sessions().partner_of(id)
    }

    pub fn display_name(&self, id: &ConnectionId) -> &str {
        self.registry.display_name(id)
    }

    pub fn waiting(&self) -> Vec<ConnectionId> {
        self.matchmaker.queue().iter().cloned().collect()
    }

    pub fn activity(&self) -> Vec<ActivityRecord> {
        self.activity.snapshot()
    }

    /// The activity record written by the last disconnect, if it is still retained.
    pub fn latest_activity(&self) -> Option<&ActivityRecord> {
        self.activity.latest()
    }

    /// Lengths in minutes of the sessions closed since the last call.
    pub fn drain_session_lengths(&mut self) -> Vec<f64> {
        self.matchmaker.drain_ended()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            online: self.registry.len(),
            waiting: self.matchmaker.queue().len(),
            sessions: self.matchmaker.sessions().len(),
        }
    }
}
