//! Pairing state machine.
//!
//! Per connection: `Idle -> Waiting -> Paired -> (Waiting | Paired)`. A
//! connection is never both queued and paired: it is dequeued before a
//! session is installed, and only re-enqueued once its session is gone.
//!
//! Whenever a session ends, by `endChat` or by a disconnect, every freed
//! connection re-enters matching through [`Matchmaker::request_match`], the
//! orphaned partner first. The orphan therefore joins the back of the queue
//! (or takes its head) before the ending side gets its turn.

use std::collections::VecDeque;

use chrono::Utc;
use pairchat_core::{ChatPartner, ConnectionId, ServerEvent};
use tracing::debug;

use crate::outbox::Outbox;
use crate::queue::WaitingQueue;
use crate::registry::ConnectionRegistry;
use crate::sessions::SessionTable;

/// Closed-session lengths kept until drained; older ones are dropped first.
const ENDED_SESSION_BACKLOG: usize = 1024;

/// Where a connection currently sits in the matching lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    Waiting,
    Paired(ConnectionId),
}

#[derive(Debug, Default)]
pub struct Matchmaker {
    queue: WaitingQueue,
    sessions: SessionTable,
    ended: VecDeque<f64>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &WaitingQueue {
        &self.queue
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Lengths in minutes of sessions closed since the last drain.
    pub fn drain_ended(&mut self) -> Vec<f64> {
        self.ended.drain(..).collect()
    }

    fn close(&mut self, id: &ConnectionId) -> Option<ConnectionId> {
        let ended = self.sessions.unpair(id)?;
        let minutes = ended.minutes_until(Utc::now());
        if self.ended.len() >= ENDED_SESSION_BACKLOG {
            self.ended.pop_front();
        }
        self.ended.push_back(minutes);
        Some(ended.partner)
    }

    pub fn state_of(&self, id: &ConnectionId) -> MatchState {
        if let Some(partner) = self.sessions.partner_of(id) {
            MatchState::Paired(partner.clone())
        } else if self.queue.contains(id) {
            MatchState::Waiting
        } else {
            MatchState::Idle
        }
    }

    /// Pair `id` with the longest waiter, or queue it if nobody is waiting.
    /// No-op for connections already waiting or paired.
    pub fn request_match(
        &mut self,
        id: &ConnectionId,
        registry: &ConnectionRegistry,
        out: &mut Outbox,
    ) {
        match self.state_of(id) {
            MatchState::Idle => {}
            state => {
                debug!(connection_id = %id, ?state, "match request ignored");
                return;
            }
        }

        match self.queue.dequeue_next() {
            Some(waiter) => self.install(id, &waiter, registry, out),
            None => {
                self.queue.enqueue(id);
                debug!(connection_id = %id, "waiting for partner");
                out.to(id, ServerEvent::Waiting);
            }
        }
    }

    /// Explicit end of session by `id`. Both sides are told the chat ended,
    /// then both re-enter matching, orphaned partner first.
    pub fn end_session(
        &mut self,
        id: &ConnectionId,
        registry: &ConnectionRegistry,
        out: &mut Outbox,
    ) {
        let partner = self.close(id);
        if let Some(partner) = &partner {
            debug!(connection_id = %id, partner_id = %partner, "session ended");
            out.to(partner, ServerEvent::ChatEnded);
        }
        out.to(id, ServerEvent::ChatEnded);

        if let Some(partner) = &partner {
            self.request_match(partner, registry, out);
        }
        self.request_match(id, registry, out);
    }

    /// Drop every trace of `id` (it is disconnecting). An orphaned partner
    /// is told the chat ended and re-enters matching.
    pub fn leave(&mut self, id: &ConnectionId, registry: &ConnectionRegistry, out: &mut Outbox) {
        self.queue.remove(id);
        if let Some(partner) = self.close(id) {
            debug!(connection_id = %id, partner_id = %partner, "partner left session");
            out.to(&partner, ServerEvent::ChatEnded);
            self.request_match(&partner, registry, out);
        }
    }

    fn install(
        &mut self,
        a: &ConnectionId,
        b: &ConnectionId,
        registry: &ConnectionRegistry,
        out: &mut Outbox,
    ) {
        self.sessions
            .pair(a, b)
            .unwrap_or_else(|err| panic!("matchmaker broke session invariant: {err}"));
        debug!(connection_id = %a, partner_id = %b, "session started");

        out.to(
            a,
            ServerEvent::ChatStarted(ChatPartner {
                partner_id: b.clone(),
                partner_username: registry.display_name(b).to_string(),
            }),
        );
        out.to(
            b,
            ServerEvent::ChatStarted(ChatPartner {
                partner_id: a.clone(),
                partner_username: registry.display_name(a).to_string(),
            }),
        );
    }
}
