use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pairchat_core::{ConnectionId, EngineError};

#[derive(Clone, Debug)]
struct SessionLink {
    partner: ConnectionId,
    started_at: DateTime<Utc>,
}

/// What [`SessionTable::unpair`] hands back about the session it removed.
#[derive(Clone, Debug, PartialEq)]
pub struct EndedSession {
    pub partner: ConnectionId,
    pub started_at: DateTime<Utc>,
}

impl EndedSession {
    /// Session length in fractional minutes as of `now`.
    pub fn minutes_until(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 60_000.0
    }
}

/// Symmetric connection → partner table. Every session is stored as two
/// directed entries; both are always installed and removed together.
#[derive(Debug, Default)]
pub struct SessionTable {
    links: HashMap<ConnectionId, SessionLink>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session between `a` and `b`.
    pub fn pair(&mut self, a: &ConnectionId, b: &ConnectionId) -> Result<(), EngineError> {
        if a == b {
            return Err(EngineError::SelfPairing(a.clone()));
        }
        for id in [a, b] {
            if self.links.contains_key(id) {
                return Err(EngineError::AlreadyPaired(id.clone()));
            }
        }
        let started_at = Utc::now();
        self.links.insert(
            a.clone(),
            SessionLink {
                partner: b.clone(),
                started_at,
            },
        );
        self.links.insert(
            b.clone(),
            SessionLink {
                partner: a.clone(),
                started_at,
            },
        );
        Ok(())
    }

    pub fn partner_of(&self, id: &ConnectionId) -> Option<&ConnectionId> {
        self.links.get(id).map(|link| &link.partner)
    }

    pub fn is_paired(&self, id: &ConnectionId) -> bool {
        self.links.contains_key(id)
    }

    /// End the session `id` belongs to. Removes both directed entries and
    /// returns the former partner with the session start time.
    pub fn unpair(&mut self, id: &ConnectionId) -> Option<EndedSession> {
        let link = self.links.remove(id)?;
        let reverse = self.links.remove(&link.partner);
        debug_assert!(
            reverse.is_some_and(|r| &r.partner == id),
            "session table asymmetric for {id}"
        );
        Some(EndedSession {
            partner: link.partner,
            started_at: link.started_at,
        })
    }

    /// Number of active sessions (pairs, not directed entries).
    pub fn len(&self) -> usize {
        self.links.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// True when every entry has a matching reverse entry.
    pub fn is_symmetric(&self) -> bool {
        self.links.iter().all(|(id, link)| {
            self.links
                .get(&link.partner)
                .is_some_and(|reverse| &reverse.partner == id)
        })
    }
}
