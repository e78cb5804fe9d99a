use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pairchat_core::{ConnectionId, EngineError, ANONYMOUS};

/// Metadata for one live connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// Display name, or [`ANONYMOUS`] if none was set.
    pub fn display_name_or_default(&self) -> &str {
        self.display_name.as_deref().unwrap_or(ANONYMOUS)
    }
}

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &ConnectionId) -> Result<(), EngineError> {
        self.register_at(id, Utc::now())
    }

    pub fn register_at(
        &mut self,
        id: &ConnectionId,
        connected_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.connections.contains_key(id) {
            return Err(EngineError::DuplicateConnection(id.clone()));
        }
        self.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                display_name: None,
                connected_at,
            },
        );
        Ok(())
    }

    /// Store a display name. Unknown connections are ignored; returns whether
    /// the name was stored. Uniqueness is the caller's concern.
    pub fn set_display_name(&mut self, id: &ConnectionId, name: &str) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.display_name = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove a connection, handing back its record so the caller can release
    /// the display name.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Display name for partner notifications, [`ANONYMOUS`] when unset or
    /// unknown.
    pub fn display_name(&self, id: &ConnectionId) -> &str {
        self.connections
            .get(id)
            .map_or(ANONYMOUS, Connection::display_name_or_default)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
