//! Partner matching and session relay.
//!
//! All state lives in one [`ChatEngine`] value owned by the caller. Every
//! operation runs to completion and returns an [`Outbox`] of deliveries;
//! the engine never touches the network itself.

pub mod activity;
pub mod engine;
pub mod matchmaker;
pub mod names;
pub mod outbox;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod sessions;

pub use activity::{ActivityLog, ActivityRecord};
pub use engine::{ChatEngine, EngineStats};
pub use matchmaker::{MatchState, Matchmaker};
pub use names::NameRegistry;
pub use outbox::{Delivery, Outbox, Target};
pub use queue::WaitingQueue;
pub use registry::{Connection, ConnectionRegistry};
pub use relay::RelayDispatcher;
pub use sessions::{EndedSession, SessionTable};
