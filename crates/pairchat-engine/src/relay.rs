use pairchat_core::{ConnectionId, RelayEvent};
use tracing::trace;

use crate::outbox::{Delivery, Target};
use crate::sessions::SessionTable;

/// Forwards relay-class events to the sender's current partner.
///
/// Payloads are opaque. A sender without a partner (never paired, or the
/// partner just left) gets its event dropped without error.
pub struct RelayDispatcher<'a> {
    sessions: &'a SessionTable,
}

impl<'a> RelayDispatcher<'a> {
    pub fn new(sessions: &'a SessionTable) -> Self {
        Self { sessions }
    }

    pub fn forward(&self, from: &ConnectionId, event: RelayEvent) -> Option<Delivery> {
        let Some(partner) = self.sessions.partner_of(from) else {
            trace!(connection_id = %from, kind = event.kind.as_str(), "relay dropped, no partner");
            return None;
        };
        Some(Delivery {
            target: Target::Connection(partner.clone()),
            event: event.into_server_event(),
        })
    }
}
